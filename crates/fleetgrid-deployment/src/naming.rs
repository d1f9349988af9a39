//! Release names.

use fleetgrid_core::{FleetError, FleetResult};
use rand::Rng;
use rand::seq::SliceRandom;

use crate::types::RELEASE_NAME_MAX_LEN;

const ADJECTIVES: &[&str] = &[
    "amber", "ancient", "autumn", "billowing", "bold", "brave", "broken", "calm", "clever",
    "crimson", "dapper", "dashing", "dusty", "eager", "early", "falling", "fierce", "fluffy",
    "frosty", "gentle", "giddy", "golden", "hasty", "hidden", "honest", "icy", "idle", "jolly",
    "kindly", "lazy", "lively", "lucky", "mellow", "misty", "modest", "nimble", "noisy", "odd",
    "patient", "plucky", "polished", "quiet", "rapid", "restless", "rosy", "rusty", "shy",
    "silent", "silver", "sleepy", "snowy", "solemn", "steady", "stormy", "sunny", "swift",
    "tender", "tidy", "twinkling", "vocal", "wandering", "wise", "witty", "zealous",
];

const ANIMALS: &[&str] = &[
    "albatross", "alpaca", "badger", "bat", "bear", "beaver", "bison", "buffalo", "camel",
    "cat", "cheetah", "cobra", "condor", "coyote", "crab", "crane", "deer", "dingo", "dolphin",
    "donkey", "eagle", "eel", "elk", "falcon", "ferret", "finch", "fox", "gazelle", "gecko",
    "gibbon", "goat", "gopher", "heron", "hippo", "horse", "hyena", "ibis", "iguana", "jackal",
    "jaguar", "koala", "lemur", "leopard", "lion", "llama", "lynx", "marmot", "mole", "moose",
    "newt", "octopus", "otter", "owl", "panda", "parrot", "penguin", "puffin", "quail", "rabbit",
    "raven", "seal", "shark", "sloth", "squid", "stoat", "swan", "tiger", "toad", "turtle",
    "vulture", "walrus", "wolf", "wombat", "yak", "zebra",
];

/// Random `adjective-animal` name, cut to the maximum release name length.
pub fn generate_release_name() -> String {
    let mut rng = rand::thread_rng();
    let adjective = ADJECTIVES.choose(&mut rng).copied().unwrap_or("quiet");
    let animal = ANIMALS.choose(&mut rng).copied().unwrap_or("otter");
    truncate(format!("{adjective}-{animal}"))
}

/// Generated name not accepted by `is_taken`. Falls back to a numeric
/// suffix when every attempt collides.
pub fn generate_unique_release_name(mut is_taken: impl FnMut(&str) -> bool) -> String {
    for _ in 0..16 {
        let name = generate_release_name();
        if !is_taken(&name) {
            return name;
        }
    }
    loop {
        let suffix: u32 = rand::thread_rng().gen_range(1000..10000);
        let name = truncate(format!("{}-{suffix}", generate_release_name()));
        if !is_taken(&name) {
            return name;
        }
    }
}

/// Reject names the installer engine would refuse.
pub fn validate_release_name(name: &str) -> FleetResult<()> {
    if name.len() > RELEASE_NAME_MAX_LEN {
        return Err(FleetError::InvalidReleaseName(format!(
            "{name} is longer than {RELEASE_NAME_MAX_LEN} characters"
        )));
    }
    Ok(())
}

fn truncate(mut name: String) -> String {
    if name.len() > RELEASE_NAME_MAX_LEN {
        name.truncate(RELEASE_NAME_MAX_LEN);
    }
    name
}
