use super::Payload;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RandomNumber {
    pub minimum: i64,
    pub maximum: i64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<i64>,
}

impl Payload for RandomNumber {
    const KIND: &'static str = "random_number";
    const COMPUTED: &'static [&'static str] = &["value"];
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RandomId {
    pub byte_length: usize,

    pub hex: String,
    pub dec: String,
}

impl Payload for RandomId {
    const KIND: &'static str = "random_id";
    const COMPUTED: &'static [&'static str] = &["hex", "dec"];
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RandomPassword {
    pub length: usize,
    pub special: bool,
    pub numeric: bool,
    pub lower: bool,
    pub upper: bool,
    pub min_special: usize,
    pub min_numeric: usize,
    pub min_lower: usize,
    pub min_upper: usize,
    /// Replaces the default special character set when non-empty.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub override_special: String,

    pub value: String,
}

impl Default for RandomPassword {
    fn default() -> Self {
        Self {
            length: 0,
            special: true,
            numeric: true,
            lower: true,
            upper: true,
            min_special: 0,
            min_numeric: 0,
            min_lower: 0,
            min_upper: 0,
            override_special: String::new(),
            value: String::new(),
        }
    }
}

impl Payload for RandomPassword {
    const KIND: &'static str = "random_password";
    const COMPUTED: &'static [&'static str] = &["value"];
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RandomUuid {
    pub value: String,
}

impl Payload for RandomUuid {
    const KIND: &'static str = "random_uuid";
    const COMPUTED: &'static [&'static str] = &["value"];
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RandomCreature {
    pub value: String,
}

impl Payload for RandomCreature {
    const KIND: &'static str = "random_creature";
    const COMPUTED: &'static [&'static str] = &["value"];
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn password_character_classes_default_on() {
        let p: RandomPassword = serde_json::from_value(json!({"length": 16})).unwrap();
        assert_eq!(p.length, 16);
        assert!(p.special && p.numeric && p.lower && p.upper);
    }

    #[test]
    fn password_classes_can_be_disabled() {
        let p: RandomPassword =
            serde_json::from_value(json!({"length": 8, "special": false})).unwrap();
        assert!(!p.special);
        assert!(p.upper);
    }
}
