use serde::{Deserialize, Serialize};

/// One sensor sample from the dive computer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Sequence position assigned by the device, dense from 0.
    pub index: u32,
    pub pressure: f64,
    /// Water temperature in Celsius
    pub temperature: f64,
    /// Depth in meters
    pub depth: f64,
    /// Seconds since the Unix epoch
    pub timestamp: i64,
}

/// Ordered entries received in one complete sync session.
///
/// Persisted as a bare JSON array of entries.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DiveLog {
    pub entries: Vec<LogEntry>,
}

impl DiveLog {
    pub fn new(entries: Vec<LogEntry>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A photo-derived species sighting.
///
/// Starts unlogged; matching against a dive log fills `depth` and
/// `temperature` exactly once and flips `is_logged`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Discovery {
    pub image_path: String,
    pub scientific_name: String,
    pub timestamp: i64,
    #[serde(default)]
    pub is_logged: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

impl Discovery {
    pub fn new(
        image_path: impl Into<String>,
        scientific_name: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        Self {
            image_path: image_path.into(),
            scientific_name: scientific_name.into(),
            timestamp,
            is_logged: false,
            depth: None,
            temperature: None,
        }
    }

    /// Copy of this discovery annotated with the conditions of `entry`.
    pub fn logged_with(&self, entry: &LogEntry) -> Self {
        Self {
            depth: Some(entry.depth),
            temperature: Some(entry.temperature),
            is_logged: true,
            ..self.clone()
        }
    }
}

/// Output of the external species classifier.
#[derive(Clone, Debug, PartialEq)]
pub struct Prediction {
    pub scientific_name: String,
    /// Softmax score in `0.0..=1.0`
    pub confidence: f32,
}

impl Prediction {
    pub fn new(scientific_name: impl Into<String>, confidence: f32) -> Self {
        Self {
            scientific_name: scientific_name.into(),
            confidence,
        }
    }

    /// Display name, e.g. `Moon_Wrasse` becomes `Moon Wrasse`.
    pub fn common_name(&self) -> String {
        self.scientific_name.replacen('_', " ", 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(index: u32, timestamp: i64) -> LogEntry {
        LogEntry {
            index,
            pressure: 2.1,
            temperature: 27.1,
            depth: 12.3,
            timestamp,
        }
    }

    #[test]
    fn test_discovery_persisted_field_names() {
        let discovery = Discovery::new("file:///photos/a.jpg", "Moon_Wrasse", 1_717_218_050);
        let json = serde_json::to_string(&discovery).unwrap();
        assert_eq!(
            json,
            r#"{"imagePath":"file:///photos/a.jpg","scientificName":"Moon_Wrasse","timestamp":1717218050,"isLogged":false}"#
        );

        let logged = discovery.logged_with(&entry(166, 1_717_218_050));
        let json = serde_json::to_string(&logged).unwrap();
        assert!(json.contains(r#""isLogged":true"#));
        assert!(json.contains(r#""depth":12.3"#));
        assert!(json.contains(r#""temperature":27.1"#));
    }

    #[test]
    fn test_discovery_missing_is_logged_defaults_false() {
        let json = r#"{"imagePath":"a.jpg","scientificName":"Clownfish","timestamp":5}"#;
        let discovery: Discovery = serde_json::from_str(json).unwrap();
        assert!(!discovery.is_logged);
        assert_eq!(discovery.depth, None);
    }

    #[test]
    fn test_dive_log_is_bare_array() {
        let log = DiveLog::new(vec![entry(0, 10)]);
        let json = serde_json::to_string(&log).unwrap();
        assert!(json.starts_with("[{"));
        assert_eq!(
            json,
            r#"[{"index":0,"pressure":2.1,"temperature":27.1,"depth":12.3,"timestamp":10}]"#
        );
    }

    #[test]
    fn test_common_name() {
        assert_eq!(Prediction::new("Moon_Wrasse", 0.95).common_name(), "Moon Wrasse");
        assert_eq!(
            Prediction::new("Blue_Spotted_Ray", 0.95).common_name(),
            "Blue Spotted_Ray"
        );
    }
}
