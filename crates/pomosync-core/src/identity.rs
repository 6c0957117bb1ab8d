//! Random peer identities.

use rand::seq::SliceRandom;
use rand::Rng;

/// Golden angle in degrees; successive hues land far apart on the wheel.
const GOLDEN_ANGLE: f64 = 137.508;

const ADJECTIVES: &[&str] = &[
    "amber", "brave", "calm", "dapper", "eager", "fuzzy", "gentle", "happy", "icy", "jolly",
    "keen", "lucky", "mellow", "nimble", "odd", "proud", "quiet", "rapid", "sunny", "tidy",
    "upbeat", "vivid", "witty", "young", "zesty",
];

const NOUNS: &[&str] = &[
    "apple", "badger", "comet", "dune", "ember", "falcon", "garden", "harbor", "island",
    "jungle", "kettle", "lantern", "meadow", "nebula", "otter", "pebble", "quartz", "river",
    "sparrow", "tomato", "umbrella", "violet", "willow", "yak", "zephyr",
];

/// A pastel color as a CSS `hsl()` string.
pub fn random_color() -> String {
    let n: u32 = rand::thread_rng().gen();
    color_for(u64::from(n))
}

/// Color for a given seed, stepping the hue by the golden angle.
pub fn color_for(seed: u64) -> String {
    let hue = (seed as f64 * GOLDEN_ANGLE) % 360.0;
    format!("hsl({:.1},50%,75%)", hue)
}

/// Two-word slug such as `quiet-otter`.
pub fn random_username() -> String {
    let mut rng = rand::thread_rng();
    let adjective = ADJECTIVES.choose(&mut rng).copied().unwrap_or("anonymous");
    let noun = NOUNS.choose(&mut rng).copied().unwrap_or("peer");
    format!("{}-{}", adjective, noun)
}
