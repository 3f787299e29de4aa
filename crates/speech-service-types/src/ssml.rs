/// Escapes the five XML special characters.
pub fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// A single-voice SSML request body.
#[derive(Debug, Clone)]
pub struct SsmlDocument {
    language: String,
    voice_name: String,
    text: String,
}

impl SsmlDocument {
    pub fn new(voice_name: &str, text: &str) -> Self {
        Self {
            language: "en-US".to_string(),
            voice_name: voice_name.to_string(),
            text: text.to_string(),
        }
    }

    pub fn with_language(mut self, language: &str) -> Self {
        self.language = language.to_string();
        self
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn voice_name(&self) -> &str {
        &self.voice_name
    }

    pub fn render(&self) -> String {
        format!(
            "<speak version='1.0' xml:lang='{}'><voice name='{}'>{}</voice></speak>",
            escape_xml(&self.language),
            escape_xml(&self.voice_name),
            escape_xml(&self.text)
        )
    }
}
