use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Represents ways to locate an element on a portal page
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Selector {
    /// Select using an XPath expression
    XPath(String),
    /// Select using a CSS selector
    Css(String),
    /// Select by DOM id
    Id(String),
    /// Select elements whose own normalized text equals the value
    Text(String),
    /// Chain multiple selectors, each step searched inside the previous matches
    Chain(Vec<Selector>),
    /// Represents an invalid selector string, with a reason.
    Invalid(String),
}

impl Selector {
    pub fn is_valid(&self) -> bool {
        match self {
            Selector::Invalid(_) => false,
            Selector::Chain(parts) => !parts.is_empty() && parts.iter().all(Selector::is_valid),
            _ => true,
        }
    }
}

impl std::fmt::Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Selector::XPath(x) => write!(f, "xpath:{x}"),
            Selector::Css(c) => write!(f, "css:{c}"),
            Selector::Id(id) => write!(f, "#{id}"),
            Selector::Text(t) => write!(f, "text:{t}"),
            Selector::Chain(parts) => {
                let joined: Vec<String> = parts.iter().map(|p| p.to_string()).collect();
                write!(f, "{}", joined.join(" >> "))
            }
            Selector::Invalid(reason) => write!(f, "invalid:{reason}"),
        }
    }
}

impl From<&str> for Selector {
    fn from(s: &str) -> Self {
        let s = s.trim();

        // Handle chained selectors first
        let parts: Vec<&str> = s.split(">>").map(|p| p.trim()).collect();
        if parts.len() > 1 {
            return Selector::Chain(parts.into_iter().map(Selector::from).collect());
        }

        match s {
            "" => Selector::Invalid("Empty selector".to_string()),
            _ if s.to_lowercase().starts_with("xpath:") => Selector::XPath(s[6..].trim().to_string()),
            _ if s.to_lowercase().starts_with("css:") => Selector::Css(s[4..].trim().to_string()),
            _ if s.starts_with("id:") => Selector::Id(s[3..].trim().to_string()),
            _ if s.starts_with("text:") => Selector::Text(s[5..].trim().to_string()),
            _ if s.starts_with('#') && !s.contains(' ') => Selector::Id(s[1..].to_string()),
            // bare XPath, absolute or relative
            _ if s.starts_with('/') || s.starts_with("./") || s.starts_with('(') => {
                Selector::XPath(s.to_string())
            }
            _ => Selector::Invalid(format!(
                "Unknown selector format: \"{s}\". Use prefixes like 'xpath:', 'css:', 'id:' or 'text:' to specify the selector type."
            )),
        }
    }
}

impl From<String> for Selector {
    fn from(s: String) -> Self {
        Selector::from(s.as_str())
    }
}

impl Serialize for Selector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Selector {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let selector = Selector::from(raw.as_str());
        if selector.is_valid() {
            Ok(selector)
        } else {
            Err(serde::de::Error::custom(format!("invalid selector '{raw}'")))
        }
    }
}
