// ── Action allow-list ──
//
// Service calls are only forwarded for the domains below. `get_state` is a
// read and is accepted for every known entity.

/// Reads current state. Valid for every known entity.
pub const READ_STATE: &str = "get_state";

/// Domains whose services the remote side may call.
pub const SAFE_DOMAINS: &[&str] = &[
    "alarm_control_panel",
    "automation",
    "climate",
    "cover",
    "fan",
    "humidifier",
    "input_boolean",
    "input_number",
    "input_select",
    "input_text",
    "light",
    "lock",
    "media_player",
    "scene",
    "script",
    "switch",
    "vacuum",
    "water_heater",
];

/// Whether services of `domain` may be called.
pub fn is_controllable(domain: &str) -> bool {
    SAFE_DOMAINS.contains(&domain)
}

/// Whether `action` may be carried out on an entity of `domain`.
pub fn supports(domain: &str, action: &str) -> bool {
    action == READ_STATE || (is_controllable(domain) && is_service_name(action))
}

fn is_service_name(action: &str) -> bool {
    !action.is_empty()
        && action
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}
