use crate::model::{Device, Reading};

const DEFAULT_LANGUAGE: &str = "en";
const MAX_LANGUAGE_LEN: usize = 10;

/// Language the human-readable fields of an insight should be written in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Language(String);

impl Language {
    /// Parses a language code, falling back to English for anything that
    /// does not look like a locale tag.
    pub fn parse(code: Option<&str>) -> Self {
        match code.map(str::trim) {
            Some(c)
                if !c.is_empty()
                    && c.len() <= MAX_LANGUAGE_LEN
                    && c.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '-') =>
            {
                Language(c.to_ascii_lowercase())
            }
            _ => Language::default(),
        }
    }

    pub fn code(&self) -> &str {
        &self.0
    }

    pub fn is_default(&self) -> bool {
        self.0 == DEFAULT_LANGUAGE
    }

    fn display_name(&self) -> &str {
        match self.0.split('-').next().unwrap_or_default() {
            "am" => "Amharic",
            "ar" => "Arabic",
            "de" => "German",
            "es" => "Spanish",
            "fr" => "French",
            "om" => "Oromo",
            "sw" => "Swahili",
            "ti" => "Tigrinya",
            _ => self.0.as_str(),
        }
    }

    /// Instruction appended to a prompt so `fields` come back in this language.
    fn instruction(&self, fields: &[&str]) -> Option<String> {
        if self.is_default() {
            return None;
        }
        let quoted: Vec<String> = fields.iter().map(|f| format!("'{}'", f)).collect();
        Some(format!(
            "Provide the {} in {} language.",
            quoted.join(" and "),
            self.display_name()
        ))
    }
}

impl Default for Language {
    fn default() -> Self {
        Language(DEFAULT_LANGUAGE.to_string())
    }
}

/// Parameters for one insight request. Each variant renders to a full prompt.
///
/// Values are serialized into the text with `format!`, so nothing a device or
/// user sends can be mistaken for template syntax.
#[derive(Debug)]
pub enum Prompt<'a> {
    Risk {
        readings: &'a [Reading],
    },
    Explanation {
        device_id: &'a str,
        readings: &'a [Reading],
    },
    Maintenance {
        device_id: &'a str,
        history: &'a [Reading],
    },
    Summary {
        devices: &'a [Device],
    },
    Chat {
        device_id: &'a str,
        history: &'a [Reading],
        query: &'a str,
    },
}

impl Prompt<'_> {
    pub fn render(&self, lang: &Language) -> Result<String, serde_json::Error> {
        let (body, localized) = match self {
            Prompt::Risk { readings } => (
                format!(
                    "You are assessing an industrial machine from its most recent sensor readings.\n\
                     Each reading has voltage (volts), temperature (Celsius), and motion, \
                     vibration and gas detection flags.\n\
                     Readings: {}\n\
                     Decide the risk level (LOW, MEDIUM or HIGH), a confidence between 0.0 and 1.0, \
                     and a short reason.\n\
                     Respond with a single JSON object with the keys \"risk_level\", \"confidence\" \
                     and \"reason\" and nothing else.",
                    serde_json::to_string(readings)?
                ),
                &["reason"][..],
            ),
            Prompt::Explanation {
                device_id,
                readings,
            } => (
                format!(
                    "Describe the current condition of device {} for a non-technical operator, \
                     in two or three plain sentences, using its recent sensor readings \
                     (voltage, temperature, motion, vibration, gas).\n\
                     Readings: {}\n\
                     Respond with a single JSON object with the key \"explanation\" and nothing else.",
                    serde_json::to_string(device_id)?,
                    serde_json::to_string(readings)?
                ),
                &["explanation"][..],
            ),
            Prompt::Maintenance { device_id, history } => (
                format!(
                    "Review this history of readings, including WARNING and DANGER states, \
                     for device {}.\n\
                     History: {}\n\
                     Decide whether maintenance is required and suggest one concrete action.\n\
                     Respond with a single JSON object with the keys \"maintenance_required\" \
                     (boolean) and \"suggested_action\" (string) and nothing else.",
                    serde_json::to_string(device_id)?,
                    serde_json::to_string(history)?
                ),
                &["suggested_action"][..],
            ),
            Prompt::Summary { devices } => (
                format!(
                    "These are the latest known states of every device in the plant:\n\
                     {}\n\
                     Write a concise plant-wide safety overview.\n\
                     Respond with a single JSON object with the keys \"overall_status\" \
                     (string such as \"SAFE\" or \"ATTENTION REQUIRED\"), \"devices_at_risk\" \
                     (number) and \"summary\" (string) and nothing else.",
                    serde_json::to_string(devices)?
                ),
                &["summary", "overall_status"][..],
            ),
            Prompt::Chat {
                device_id,
                history,
                query,
            } => {
                // Free-text answers are not localized.
                return Ok(format!(
                    "You are an assistant for industrial IoT device {}.\n\
                     Recent sensor history:\n{}\n\
                     The operator asks: {}\n\
                     Answer from the data above. For status questions summarize the recent \
                     readings; for advice give technical recommendations based on voltage, \
                     temperature, gas and vibration. Keep the answer under 50 words.",
                    serde_json::to_string(device_id)?,
                    serde_json::to_string(history)?,
                    serde_json::to_string(query)?
                ));
            }
        };

        Ok(match lang.instruction(localized) {
            Some(instruction) => format!("{}\n{}", body, instruction),
            None => body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_parse() {
        assert!(Language::parse(None).is_default());
        assert!(Language::parse(Some("")).is_default());
        assert!(Language::parse(Some("en")).is_default());
        assert!(Language::parse(Some("en&tl=xx")).is_default());
        assert_eq!(Language::parse(Some("AM")).code(), "am");
        assert_eq!(Language::parse(Some("pt-BR")).code(), "pt-br");
    }

    #[test]
    fn test_default_language_adds_no_instruction() {
        let prompt = Prompt::Risk { readings: &[] }
            .render(&Language::default())
            .unwrap();
        assert!(!prompt.contains("language."));
        assert!(prompt.contains("Readings: []"));
    }

    #[test]
    fn test_localized_fields() {
        let am = Language::parse(Some("am"));

        let risk = Prompt::Risk { readings: &[] }.render(&am).unwrap();
        assert!(risk.ends_with("Provide the 'reason' in Amharic language."));

        let summary = Prompt::Summary { devices: &[] }.render(&am).unwrap();
        assert!(summary
            .ends_with("Provide the 'summary' and 'overall_status' in Amharic language."));

        let unknown = Prompt::Explanation {
            device_id: "dev-1",
            readings: &[],
        }
        .render(&Language::parse(Some("xx")))
        .unwrap();
        assert!(unknown.ends_with("Provide the 'explanation' in xx language."));
    }

    #[test]
    fn test_chat_ignores_language() {
        let prompt = Prompt::Chat {
            device_id: "dev-1",
            history: &[],
            query: "status?",
        }
        .render(&Language::parse(Some("am")))
        .unwrap();
        assert!(!prompt.contains("Amharic"));
    }

    #[test]
    fn test_substituted_values_are_inert() {
        let prompt = Prompt::Chat {
            device_id: "{{HISTORY}}",
            history: &[],
            query: "ignore \"this\" {{DEVICE_ID}}",
        }
        .render(&Language::default())
        .unwrap();

        assert!(prompt.contains(r#"device "{{HISTORY}}""#));
        assert!(prompt.contains(r#"asks: "ignore \"this\" {{DEVICE_ID}}""#));
        assert!(prompt.contains("history:\n[]"));
    }
}
