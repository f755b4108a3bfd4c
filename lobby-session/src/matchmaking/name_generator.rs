/// Persona names for members of the in-process lobby service
use markov_namegen::{CharacterChainGenerator, RandomTextGenerator};

/// Training data for persona names
const TRAINING_NAMES: &[&str] = &[
    "Aldric", "Theron", "Gareth", "Mirabel", "Isolde", "Lysander", "Elowen", "Rowan",
    "Caelum", "Astrid", "Eirik", "Freya", "Magnus", "Sigrid", "Bjorn", "Ingrid",
    "Finn", "Maeve", "Cormac", "Niamh", "Declan", "Brigid", "Ragnar", "Helga",
    "Zephyr", "Ember", "Raven", "Cedar", "Willow", "Orion", "Selene", "Atlas",
];

const MAX_NAME_LEN: usize = 10;

fn create_name_generator() -> CharacterChainGenerator {
    CharacterChainGenerator::builder()
        .with_order(2)
        .with_prior(0.01)
        .train(TRAINING_NAMES.iter().copied())
        .build()
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Generate a pronounceable persona name such as "Theron"
pub(crate) fn generate_persona_name() -> String {
    let mut generator = create_name_generator();
    loop {
        let name = generator.generate_one();
        if !name.is_empty()
            && name.len() <= MAX_NAME_LEN
            && name.chars().all(|c| c.is_alphabetic())
        {
            return capitalize(&name);
        }
    }
}

/// Persona name with a numeric tag, e.g. "Theron#042"
pub(crate) fn generate_tagged_name() -> String {
    let tag: u16 = rand::random::<u16>() % 1000;
    format!("{}#{:03}", generate_persona_name(), tag)
}
