use std::sync::OnceLock;

use regex::Regex;

/// One `[instance]#number` token found in a message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReferenceMatch {
    /// Instance name as typed (case preserved), `None` for a bare `#123`.
    pub instance: Option<String>,
    /// Ticket number as text; leading zeros are kept.
    pub number: String,
}

impl ReferenceMatch {
    pub fn new(instance: Option<&str>, number: &str) -> Self {
        Self {
            instance: instance.map(str::to_string),
            number: number.to_string(),
        }
    }

    /// The reference as it appeared in the message.
    pub fn label(&self) -> String {
        format!("{}#{}", self.instance.as_deref().unwrap_or(""), self.number)
    }
}

fn ticket_re() -> &'static Regex {
    static TICKET_RE: OnceLock<Regex> = OnceLock::new();
    TICKET_RE.get_or_init(|| Regex::new(r"([a-zA-Z0-9]+)?#([0-9]+)").expect("valid regex"))
}

/// All ticket references in `text`, in order of appearance (duplicates kept).
pub fn extract_references(text: &str) -> Vec<ReferenceMatch> {
    ticket_re()
        .captures_iter(text)
        .map(|caps| ReferenceMatch {
            instance: caps.get(1).map(|m| m.as_str().to_string()),
            number: caps[2].to_string(),
        })
        .collect()
}
