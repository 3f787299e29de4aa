use serde::Deserialize;

/// Outcome of one recognition attempt in a `speech.phrase` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionStatus {
    Success,
    NoMatch,
    InitialSilenceTimeout,
    BabbleTimeout,
    Error,
    EndOfDictation,
    Unknown(String),
}

impl RecognitionStatus {
    pub fn is_no_speech(&self) -> bool {
        matches!(self, Self::NoMatch | Self::InitialSilenceTimeout)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error | Self::BabbleTimeout)
    }
}

impl From<&str> for RecognitionStatus {
    fn from(status: &str) -> Self {
        match status {
            "Success" => Self::Success,
            "NoMatch" => Self::NoMatch,
            "InitialSilenceTimeout" => Self::InitialSilenceTimeout,
            "BabbleTimeout" => Self::BabbleTimeout,
            "Error" => Self::Error,
            "EndOfDictation" => Self::EndOfDictation,
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl<'de> Deserialize<'de> for RecognitionStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let status = String::deserialize(deserializer)?;
        Ok(Self::from(status.as_str()))
    }
}

/// Final result of a speech segment (`format=simple`).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SpeechPhrase {
    recognition_status: RecognitionStatus,
    #[serde(default)]
    display_text: Option<String>,
    #[serde(default)]
    offset: u64,
    #[serde(default)]
    duration: u64,
}

impl SpeechPhrase {
    pub fn recognition_status(&self) -> &RecognitionStatus {
        &self.recognition_status
    }

    pub fn display_text(&self) -> &str {
        self.display_text.as_deref().unwrap_or_default()
    }

    /// Offset into the audio stream, in 100 ns ticks.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn duration(&self) -> u64 {
        self.duration
    }
}

/// Interim guess while a segment is still being spoken.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SpeechHypothesis {
    text: String,
    #[serde(default)]
    offset: u64,
    #[serde(default)]
    duration: u64,
}

impl SpeechHypothesis {
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn duration(&self) -> u64 {
        self.duration
    }
}

/// A text message from the recognition socket.
#[derive(Debug, Clone)]
pub enum ServiceMessage {
    Hypothesis(SpeechHypothesis),
    Phrase(SpeechPhrase),
    SpeechStartDetected,
    SpeechEndDetected,
    TurnStart,
    TurnEnd,
    Unknown(String),
}

impl ServiceMessage {
    /// Parses a header block (`Path: ...`), a blank line and a JSON body.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let Some((headers, body)) = split_headers(text) else {
            return Ok(Self::Unknown(preview(text)));
        };
        let Some(path) = header_value(headers, "path") else {
            return Ok(Self::Unknown(preview(text)));
        };

        let message = match path.as_str() {
            "speech.hypothesis" => Self::Hypothesis(serde_json::from_str(body)?),
            "speech.phrase" => Self::Phrase(serde_json::from_str(body)?),
            "speech.startdetected" => Self::SpeechStartDetected,
            "speech.enddetected" => Self::SpeechEndDetected,
            "turn.start" => Self::TurnStart,
            "turn.end" => Self::TurnEnd,
            _ => Self::Unknown(path),
        };
        Ok(message)
    }
}

fn split_headers(text: &str) -> Option<(&str, &str)> {
    if let Some((headers, body)) = text.split_once("\r\n\r\n") {
        return Some((headers, body.trim()));
    }
    text.split_once("\n\n")
        .map(|(headers, body)| (headers, body.trim()))
}

/// Case-insensitive lookup; the returned value is lower-cased.
fn header_value(headers: &str, name: &str) -> Option<String> {
    headers.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim()
            .eq_ignore_ascii_case(name)
            .then(|| value.trim().to_ascii_lowercase())
    })
}

fn preview(text: &str) -> String {
    text.chars().take(64).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_final_phrase() {
        let raw = "X-RequestId:123\r\nPath:speech.phrase\r\nContent-Type:application/json\r\n\r\n\
                   {\"RecognitionStatus\":\"Success\",\"DisplayText\":\"Can I afford a $20 hoodie?\",\"Offset\":100,\"Duration\":2000}";

        match ServiceMessage::parse(raw).unwrap() {
            ServiceMessage::Phrase(phrase) => {
                assert_eq!(phrase.recognition_status(), &RecognitionStatus::Success);
                assert_eq!(phrase.display_text(), "Can I afford a $20 hoodie?");
                assert_eq!(phrase.offset(), 100);
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn parses_hypothesis_with_unix_newlines() {
        let raw = "path: speech.hypothesis\n\n{\"Text\":\"can I\",\"Offset\":0,\"Duration\":10}";

        match ServiceMessage::parse(raw).unwrap() {
            ServiceMessage::Hypothesis(hypothesis) => assert_eq!(hypothesis.text(), "can I"),
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn no_match_has_no_text() {
        let raw = "Path:speech.phrase\r\n\r\n{\"RecognitionStatus\":\"NoMatch\",\"Offset\":0,\"Duration\":0}";

        match ServiceMessage::parse(raw).unwrap() {
            ServiceMessage::Phrase(phrase) => {
                assert!(phrase.recognition_status().is_no_speech());
                assert_eq!(phrase.display_text(), "");
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn unknown_statuses_are_kept() {
        assert_eq!(
            RecognitionStatus::from("TooManyRequests"),
            RecognitionStatus::Unknown("TooManyRequests".to_string())
        );
        assert!(RecognitionStatus::from("BabbleTimeout").is_error());
    }

    #[test]
    fn turn_markers_and_unknown_paths() {
        assert!(matches!(
            ServiceMessage::parse("Path:turn.start\r\n\r\n{}").unwrap(),
            ServiceMessage::TurnStart
        ));
        assert!(matches!(
            ServiceMessage::parse("Path:speech.startDetected\r\n\r\n{\"Offset\":1}").unwrap(),
            ServiceMessage::SpeechStartDetected
        ));
        assert!(matches!(
            ServiceMessage::parse("Path:speech.fragment\r\n\r\n{}").unwrap(),
            ServiceMessage::Unknown(path) if path == "speech.fragment"
        ));
        assert!(matches!(
            ServiceMessage::parse("{\"no\":\"headers\"}").unwrap(),
            ServiceMessage::Unknown(_)
        ));
    }

    #[test]
    fn malformed_body_is_an_error() {
        assert!(ServiceMessage::parse("Path:speech.phrase\r\n\r\nnot json").is_err());
    }
}
