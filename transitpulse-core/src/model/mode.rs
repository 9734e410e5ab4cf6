//! Mode identifiers

pub const WALKING_MODE: &str = "walking";
pub const BIKE_MODE: &str = "bike";

/// Label used for a GTFS `route_type`.
///
/// Unlisted extended route types keep their numeric code so that distinct
/// feeds never collapse into the same graph.
pub fn mode_label_for_route_type(route_type: u16) -> String {
    let label = match route_type {
        0 => "tram",
        1 => "subway",
        2 => "rail",
        3 => "bus",
        4 => "ferry",
        5 => "cable_tram",
        6 => "aerial_lift",
        7 => "funicular",
        11 => "trolleybus",
        12 => "monorail",
        other => return format!("route_type_{other}"),
    };
    label.to_string()
}
