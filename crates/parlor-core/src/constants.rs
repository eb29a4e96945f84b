//! Shared constants.

/// Content stored for an assistant message that chose not to speak.
///
/// Clients render it as a skip indicator; it is never shown to other agents
/// and never counts toward a room's interaction cap.
pub const SKIP_MESSAGE_TEXT: &str = "(skipped)";

/// Speaker label used for situation-builder messages.
pub const SITUATION_BUILDER_LABEL: &str = "Situation Builder";
