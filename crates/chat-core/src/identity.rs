use sha2::{Digest, Sha256};

const ADJECTIVES: &[&str] = &[
    "Amber", "Brave", "Calm", "Clever", "Cosmic", "Crimson", "Dusty", "Eager", "Gentle", "Golden",
    "Hidden", "Jolly", "Lucky", "Mellow", "Misty", "Nimble", "Quiet", "Rapid", "Silver", "Sunny",
    "Swift", "Velvet", "Witty", "Zesty",
];

const ANIMALS: &[&str] = &[
    "Badger", "Beaver", "Condor", "Falcon", "Ferret", "Gecko", "Heron", "Ibis", "Jaguar", "Koala",
    "Lemur", "Lynx", "Marten", "Otter", "Panda", "Puffin", "Quokka", "Raven", "Salmon", "Tapir",
    "Walrus", "Wombat", "Yak", "Zebra",
];

/// Normalize a channel or room name for use in a content topic.
pub fn topic_component(value: &str) -> String {
    value
        .chars()
        .filter(|ch| !ch.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Content topic for a room: `/{channel}/1/{room}/proto`.
pub fn content_topic(channel: &str, room: &str) -> String {
    format!(
        "/{}/1/{}/proto",
        topic_component(channel),
        topic_component(room)
    )
}

/// Room name shared by two participants regardless of who opens it.
///
/// Opening a private room with oneself yields a room named after the id.
pub fn private_room_name(local_id: &str, remote_id: &str) -> String {
    if local_id == remote_id {
        return local_id.to_owned();
    }

    let (first, second) = if remote_id < local_id {
        (remote_id, local_id)
    } else {
        (local_id, remote_id)
    };
    format!("{first} & {second}")
}

/// Human-readable name derived from a participant id.
///
/// Picks are read straight from the SHA-256 digest of the id, so the same id
/// yields the same name on every build.
pub fn generate_display_name(participant_id: &str) -> String {
    let digest = Sha256::digest(participant_id.as_bytes());
    let word = |offset: usize| {
        u32::from_be_bytes([
            digest[offset],
            digest[offset + 1],
            digest[offset + 2],
            digest[offset + 3],
        ]) as usize
    };

    let adjective = ADJECTIVES[word(0) % ADJECTIVES.len()];
    let animal = ANIMALS[word(4) % ANIMALS.len()];
    let number = 10 + word(8) % 90;
    format!("{adjective} {animal} {number}")
}
