//! Human-friendly session codes such as `BLUE-FOX-42`.

use handoff_protocol::{ProtocolError, SessionCode};
use rand::Rng;

const ADJECTIVES: &[&str] = &[
    "Red", "Blue", "Green", "Yellow", "Purple", "Orange", "Pink", "Black", "White", "Quick",
    "Slow", "Big", "Small", "Loud", "Quiet", "Happy", "Sad", "Bright", "Dark", "Clever", "Brave",
    "Calm", "Eager", "Fierce", "Gentle", "Jolly",
];

const NOUNS: &[&str] = &[
    "Cat", "Dog", "Fox", "Lion", "Tiger", "Bear", "Bird", "Fish", "Wolf", "Horse", "Ant", "Bee",
    "Cow", "Duck", "Elk", "Frog", "Goat", "Hawk", "Jay", "Kiwi", "Lark", "Mule", "Newt", "Owl",
    "Pig", "Rat", "Swan", "Toad", "Vole", "Yak",
];

/// Builds an `Adjective-Noun-NN` code with a number below 100.
pub fn generate_code<R: Rng + ?Sized>(rng: &mut R) -> Result<SessionCode, ProtocolError> {
    let adjective = ADJECTIVES[rng.gen_range(0..ADJECTIVES.len())];
    let noun = NOUNS[rng.gen_range(0..NOUNS.len())];
    let number: u8 = rng.gen_range(0..100);
    SessionCode::new(format!("{adjective}-{noun}-{number}"))
}
