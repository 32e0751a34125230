//! Cleanup of raw simulation text.

use std::sync::LazyLock;

use regex::Regex;

static ARRIVAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^You arrive at loc \d+\. ").expect("arrival regex"));

/// Strip a leading `You arrive at loc N. ` sentence.
pub fn clean_observation(text: &str) -> String {
    ARRIVAL_RE.replace(text, "").into_owned()
}

/// The reset observation without its first paragraph (the welcome banner).
pub fn task_intro(observation: &str) -> String {
    observation
        .split("\n\n")
        .skip(1)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Environment name from a gamefile path: its last two directory components.
///
/// `.../pick_and_place_simple-Mug-None-Shelf-1/trial_T2019/game.tw-pddl`
/// becomes `pick_and_place_simple-Mug-None-Shelf-1/trial_T2019`.
pub fn environment_name(gamefile: &str) -> String {
    let parts: Vec<&str> = gamefile.split('/').collect();
    let dirs = &parts[..parts.len().saturating_sub(1)];
    let start = dirs.len().saturating_sub(2);
    dirs[start..].join("/")
}

/// File-name-safe form of an environment name.
pub fn simple_name(name: &str) -> String {
    name.replace('/', "_")
}
