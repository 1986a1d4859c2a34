use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Raw message text as entered by the user, possibly containing
/// `{a|b}` choice markup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageTemplate(String);

impl MessageTemplate {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// True when the text contains at least one `{...}` group.
    pub fn has_choices(&self) -> bool {
        match (self.0.find('{'), self.0.rfind('}')) {
            (Some(open), Some(close)) => open < close,
            _ => false,
        }
    }
}

impl From<&str> for MessageTemplate {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for MessageTemplate {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

pub trait TemplateExpander: Send + Sync {
    /// Produce the concrete text for one send.
    ///
    /// With `randomize == false` this is the template with surrounding
    /// whitespace trimmed, and nothing else.
    fn expand(&self, template: &str, randomize: bool) -> String;
}

/// Expands `{option a|option b}` groups, innermost first, picking each
/// option uniformly. Braces without a partner are kept as literal text.
pub struct SpintaxExpander {
    rng: Option<Mutex<StdRng>>,
}

impl SpintaxExpander {
    pub fn new() -> Self {
        Self { rng: None }
    }

    /// Deterministic expander, mostly useful in tests.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Some(Mutex::new(StdRng::seed_from_u64(seed))),
        }
    }
}

impl Default for SpintaxExpander {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateExpander for SpintaxExpander {
    fn expand(&self, template: &str, randomize: bool) -> String {
        if !randomize {
            return template.trim().to_string();
        }

        match &self.rng {
            Some(rng) => match rng.lock() {
                Ok(mut guard) => expand_with(template, &mut *guard),
                Err(poisoned) => expand_with(template, &mut *poisoned.into_inner()),
            },
            None => expand_with(template, &mut rand::thread_rng()),
        }
    }
}

pub fn expand_with<R: Rng + ?Sized>(template: &str, rng: &mut R) -> String {
    let mut text = template.to_string();
    let mut search_from = 0;

    while let Some(offset) = text[search_from..].find('}') {
        let close = search_from + offset;

        match text[..close].rfind('{') {
            Some(open) => {
                // nothing between open and close is a brace
                let options: Vec<&str> = text[open + 1..close].split('|').collect();
                let picked = options[rng.gen_range(0..options.len())].to_string();
                text.replace_range(open..=close, &picked);
                search_from = open;
            }
            None => {
                search_from = close + 1;
            }
        }
    }

    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_when_not_randomized() {
        let expander = SpintaxExpander::new();
        let template = "  {Hello|Hi} there \n";

        for _ in 0..10 {
            assert_eq!(expander.expand(template, false), "{Hello|Hi} there");
        }
    }

    #[test]
    fn test_picks_one_of_declared_alternatives() {
        let expander = SpintaxExpander::seeded(7);
        let allowed = ["Hello world", "Hi world", "Hey world"];

        for _ in 0..50 {
            let text = expander.expand("{Hello|Hi|Hey} world", true);
            assert!(allowed.contains(&text.as_str()), "unexpected expansion: {}", text);
        }
    }

    #[test]
    fn test_nested_groups() {
        let expander = SpintaxExpander::seeded(42);
        let allowed = ["a", "b", "c"];

        let mut seen = std::collections::HashSet::new();
        for _ in 0..200 {
            let text = expander.expand("{a|{b|c}}", true);
            assert!(allowed.contains(&text.as_str()), "unexpected expansion: {}", text);
            seen.insert(text);
        }
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn test_multiple_groups_and_surrounding_text() {
        let mut rng = StdRng::seed_from_u64(1);
        let text = expand_with("Join {us|the group} {today|now}!", &mut rng);

        let first = ["us", "the group"];
        let second = ["today", "now"];
        assert!(first
            .iter()
            .any(|a| second.iter().any(|b| text == format!("Join {} {}!", a, b))));
    }

    #[test]
    fn test_unbalanced_braces_are_literal() {
        let mut rng = StdRng::seed_from_u64(3);

        assert_eq!(expand_with("price } now", &mut rng), "price } now");
        assert_eq!(expand_with("open { only", &mut rng), "open { only");

        let text = expand_with("} {x|x} {", &mut rng);
        assert_eq!(text, "} x {");
    }

    #[test]
    fn test_empty_alternative_can_expand_to_empty() {
        let mut rng = StdRng::seed_from_u64(9);
        let mut saw_empty = false;
        for _ in 0..100 {
            if expand_with("  {|}  ", &mut rng).is_empty() {
                saw_empty = true;
            }
        }
        assert!(saw_empty);
    }

    #[test]
    fn test_message_template_helpers() {
        assert!(MessageTemplate::new("   \n").is_blank());
        assert!(!MessageTemplate::new("hi").is_blank());
        assert!(MessageTemplate::new("{a|b}").has_choices());
        assert!(!MessageTemplate::new("} a {").has_choices());
    }
}
