use crate::models::scan::{ProfileData, ResourceData};
use serde::{Deserialize, Serialize};

/// Outcome of one sanity check. These are deliberately cheap boundary rules
/// that catch gross OCR corruption, not semantic validation of game state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub is_reliable: bool,
    pub errors: Vec<String>,
}

impl ValidationResult {
    fn ok() -> Self {
        Self {
            is_valid: true,
            is_reliable: true,
            errors: Vec::new(),
        }
    }
}

/// Profile rules: a usable name and a positive power reading.
pub fn validate_profile(profile: &ProfileData) -> ValidationResult {
    let mut errors = Vec::new();

    let name_len = profile.name.chars().count();
    if name_len < 2 {
        errors.push("Name too short or empty".to_string());
    }
    if profile.power <= 0 {
        errors.push("Power must be positive".to_string());
    }

    let is_valid = errors.is_empty();
    // A two-character name parses but is suspicious.
    let is_reliable = is_valid && name_len >= 3;
    ValidationResult {
        is_valid,
        is_reliable,
        errors,
    }
}

/// Resource rules: no negatives, totals at least as large as bag values, and
/// not every reading zero. Four simultaneous zeros are one systemic OCR
/// failure signal, not four independent errors.
pub fn validate_resources(resources: &ResourceData) -> ValidationResult {
    let mut errors = Vec::new();
    let mut any_positive = false;

    for (name, entry) in resources.entries() {
        if entry.bag < 0 {
            errors.push(format!("{}.bag is negative ({})", name, entry.bag));
        }
        if entry.total < 0 {
            errors.push(format!("{}.total is negative ({})", name, entry.total));
        }
        if entry.total < entry.bag {
            errors.push(format!("{}.total ({}) < bag ({})", name, entry.total, entry.bag));
        }
        if entry.total > 0 || entry.bag > 0 {
            any_positive = true;
        }
    }

    if !any_positive {
        errors.push("All resources are zero - possible OCR failure".to_string());
    }

    let is_valid = errors.is_empty();
    ValidationResult {
        is_valid,
        is_reliable: is_valid && any_positive,
        errors,
    }
}

/// Building level rules: non-negative, with an advisory upper bound. A level
/// above 50 stays valid but is flagged unreliable.
pub fn validate_building_level(level: i64) -> ValidationResult {
    if level < 0 {
        return ValidationResult {
            is_valid: false,
            is_reliable: false,
            errors: vec![format!("Building level must be non-negative ({})", level)],
        };
    }
    if level > 50 {
        return ValidationResult {
            is_valid: true,
            is_reliable: false,
            errors: vec![format!("Building level suspiciously high ({})", level)],
        };
    }
    ValidationResult::ok()
}

/// Pet token rules: non-negative, flagged above 99999.
pub fn validate_pet_token(token: i64) -> ValidationResult {
    if token < 0 {
        return ValidationResult {
            is_valid: false,
            is_reliable: false,
            errors: vec![format!("Pet token must be non-negative ({})", token)],
        };
    }
    if token > 99_999 {
        return ValidationResult {
            is_valid: true,
            is_reliable: false,
            errors: vec![format!("Pet token suspiciously high ({})", token)],
        };
    }
    ValidationResult::ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::scan::ResourceEntry;

    fn profile(name: &str, power: i64) -> ProfileData {
        ProfileData {
            name: name.to_string(),
            power,
            power_raw: power.to_string(),
            power_confidence: 1.0,
        }
    }

    fn entry(bag: i64, total: i64) -> ResourceEntry {
        ResourceEntry {
            bag,
            total,
            bag_raw: String::new(),
            total_raw: String::new(),
        }
    }

    fn resources(gold: (i64, i64), wood: (i64, i64), ore: (i64, i64), mana: (i64, i64)) -> ResourceData {
        ResourceData {
            gold: entry(gold.0, gold.1),
            wood: entry(wood.0, wood.1),
            ore: entry(ore.0, ore.1),
            mana: entry(mana.0, mana.1),
        }
    }

    #[test]
    fn test_profile_valid_and_reliable() {
        let result = validate_profile(&profile("Arathor", 1_500_000));
        assert!(result.is_valid);
        assert!(result.is_reliable);
        assert!(result.errors.is_empty());
    }

    #[test]
    fn test_profile_short_name_invalid() {
        let result = validate_profile(&profile("A", 100));
        assert!(!result.is_valid);
        assert!(!result.is_reliable);
        assert_eq!(result.errors.len(), 1);
    }

    #[test]
    fn test_profile_two_char_name_valid_but_unreliable() {
        let result = validate_profile(&profile("Ax", 100));
        assert!(result.is_valid);
        assert!(!result.is_reliable);
    }

    #[test]
    fn test_profile_nonpositive_power_invalid() {
        assert!(!validate_profile(&profile("Arathor", 0)).is_valid);
        assert!(!validate_profile(&profile("Arathor", -5)).is_valid);
    }

    #[test]
    fn test_resources_all_zero_is_single_systemic_error() {
        let result = validate_resources(&resources((0, 0), (0, 0), (0, 0), (0, 0)));
        assert!(!result.is_valid);
        assert!(!result.is_reliable);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("zero"), "got: {:?}", result.errors);
    }

    #[test]
    fn test_resources_total_less_than_bag() {
        let result = validate_resources(&resources((10, 5), (0, 100), (0, 100), (0, 100)));
        assert!(!result.is_valid);
        let gold_error = result.errors.iter().find(|e| e.starts_with("gold"));
        assert!(gold_error.unwrap().contains("< bag"), "got: {:?}", result.errors);
    }

    #[test]
    fn test_resources_negative_values() {
        let result = validate_resources(&resources((-1, 100), (0, 100), (0, 100), (0, 100)));
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| e.contains("negative")));
    }

    #[test]
    fn test_resources_valid_when_any_positive() {
        let result = validate_resources(&resources((0, 0), (5, 10), (0, 0), (0, 0)));
        assert!(result.is_valid);
        assert!(result.is_reliable);
    }

    #[test]
    fn test_building_level_bounds() {
        assert!(validate_building_level(0).is_valid);
        assert!(validate_building_level(50).is_reliable);

        let negative = validate_building_level(-1);
        assert!(!negative.is_valid);

        // Above 50: advisory flag, still counted valid.
        let high = validate_building_level(51);
        assert!(high.is_valid);
        assert!(!high.is_reliable);
        assert!(!high.errors.is_empty());
    }

    #[test]
    fn test_pet_token_bounds() {
        assert!(validate_pet_token(0).is_valid);
        assert!(validate_pet_token(99_999).is_reliable);

        assert!(!validate_pet_token(-3).is_valid);

        let high = validate_pet_token(100_000);
        assert!(high.is_valid);
        assert!(!high.is_reliable);
    }
}
