// Hall sensor decoding for the position estimator
// The three-bit state is the concatenation (C, B, A)

/// Valid-sector map: raw 3-bit Hall state -> sector count 0..=5
/// Transition sequence for forward rotation:
/// 001 -> 011 -> 010 -> 110 -> 100 -> 101 -> 001
///
/// Returns None for the illegal codes 000 and 111 (all sensors low or
/// high means a disconnected or shorted sensor)
pub fn decode_hall(hall_state: u8) -> Option<i32> {
    match hall_state {
        0b001 => Some(0),
        0b011 => Some(1),
        0b010 => Some(2),
        0b110 => Some(3),
        0b100 => Some(4),
        0b101 => Some(5),
        _ => None,
    }
}
