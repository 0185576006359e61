//! Display name sanitizing and random name generation

use rand::seq::SliceRandom;

/// Display names are capped at 20 characters
pub const MAX_NAME_LEN: usize = 20;

const ADJECTIVES: &[&str] = &[
    "Silent", "Iron", "Ghost", "Crimson", "Shadow", "Steel", "Dark", "Thunder", "Lightning",
    "Frozen", "Burning", "Swift", "Deadly", "Rogue", "Venom", "Phantom", "Storm", "Night",
    "Arctic", "Blazing", "Mystic", "Savage", "Mighty", "Noble", "Ancient", "Wild", "Fierce",
    "Bold", "Brave", "Lunar", "Solar", "Cosmic", "Primal", "Stealth", "Viper", "Razor",
    "Titan", "Silver", "Golden", "Jade",
];

const NOUNS: &[&str] = &[
    "Hawk", "Viper", "Wraith", "Fox", "Wolf", "Eagle", "Dragon", "Tiger", "Panther", "Falcon",
    "Raven", "Bear", "Lion", "Cobra", "Reaper", "Hunter", "Warrior", "Ranger", "Sniper",
    "Soldier", "Ghost", "Phantom", "Shadow", "Blade", "Striker", "Thunder", "Storm", "Flame",
    "Frost", "Knight", "Guardian", "Sentinel", "Warden", "Paladin", "Champion", "Legend",
    "Hero", "Ninja", "Samurai", "Spartan",
];

/// Generate a random "Adjective Noun" display name
pub fn generate_name() -> String {
    let mut rng = rand::thread_rng();
    let adjective = ADJECTIVES.choose(&mut rng).unwrap_or(&"Rogue");
    let noun = NOUNS.choose(&mut rng).unwrap_or(&"Wolf");
    format!("{} {}", adjective, noun)
}

/// Sanitize a client-supplied display name: trim, drop control characters,
/// cap the length. A name that comes out empty is replaced by a generated one.
pub fn sanitize_name(raw: Option<&str>) -> String {
    let cleaned: String = raw
        .unwrap_or("")
        .trim()
        .chars()
        .filter(|c| !c.is_control())
        .take(MAX_NAME_LEN)
        .collect();

    if cleaned.trim().is_empty() {
        generate_name()
    } else {
        cleaned
    }
}
