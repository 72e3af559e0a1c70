use crate::models::pollution::SensorLocation;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Load the ordered sensor list. Order is preserved and decides row ids.
pub fn load_locations(path: &Path) -> Result<Vec<SensorLocation>, String> {
    let json = fs::read_to_string(path).map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    parse_locations(&json).map_err(|e| format!("{}: {}", path.display(), e))
}

pub fn parse_locations(json: &str) -> Result<Vec<SensorLocation>, String> {
    let de = &mut serde_json::Deserializer::from_str(json);
    let locations: Vec<SensorLocation> =
        serde_path_to_error::deserialize(de).map_err(|e| format!("{} at {}", e.inner(), e.path()))?;

    if locations.is_empty() {
        return Err("no sensor locations configured".to_string());
    }

    let mut seen = HashSet::with_capacity(locations.len());
    for loc in &locations {
        if loc.station_id.trim().is_empty() {
            return Err("station_id cannot be empty".to_string());
        }
        if !seen.insert(loc.station_id.as_str()) {
            return Err(format!("duplicate station_id {}", loc.station_id));
        }
        if !loc.coord().is_finite() || loc.latitude.abs() > 90.0 || loc.longitude.abs() > 180.0 {
            return Err(format!(
                "station {} has invalid coordinates ({}, {})",
                loc.station_id, loc.latitude, loc.longitude
            ));
        }
    }

    Ok(locations)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_in_order() {
        let json = r#"[
            {"station_id":"PER-14-007","latitude":8.09,"longitude":98.91},
            {"station_id":"PER-3-014","latitude":14.35,"longitude":100.57}
        ]"#;
        let locs = parse_locations(json).unwrap();
        assert_eq!(locs.len(), 2);
        assert_eq!(locs[0].station_id, "PER-14-007");
        assert_eq!(locs[1].latitude, 14.35);
    }

    #[test]
    fn rejects_duplicates_and_bad_coordinates() {
        let dup = r#"[{"station_id":"A","latitude":1,"longitude":2},{"station_id":"A","latitude":3,"longitude":4}]"#;
        assert!(parse_locations(dup).unwrap_err().contains("duplicate"));

        let bad = r#"[{"station_id":"A","latitude":91,"longitude":2}]"#;
        assert!(parse_locations(bad).unwrap_err().contains("invalid coordinates"));

        assert!(parse_locations("[]").is_err());
    }

    #[test]
    fn reports_path_of_malformed_entry() {
        let json = r#"[{"station_id":"A","latitude":1,"longitude":2},{"station_id":"B","latitude":"x","longitude":2}]"#;
        let err = parse_locations(json).unwrap_err();
        assert!(err.contains("[1].latitude"), "{}", err);
    }
}
