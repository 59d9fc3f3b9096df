//! Device family detection for scan detail lines.
//!
//! Identification payloads are not fully documented by the vendor, so the
//! classifier is a replaceable strategy. Anything it cannot place is treated
//! as an AM1 device.

use super::DeviceType;

pub trait DeviceClassifier: Send + Sync {
    fn classify(&self, payload: &str) -> DeviceType;
}

impl<F> DeviceClassifier for F
where
    F: Fn(&str) -> DeviceType + Send + Sync,
{
    fn classify(&self, payload: &str) -> DeviceType {
        self(payload)
    }
}

/// Substring based classifier, first matching marker wins
#[derive(Debug, Clone)]
pub struct MarkerClassifier {
    markers: Vec<(String, DeviceType)>,
    fallback: DeviceType,
}

impl MarkerClassifier {
    pub fn new(markers: Vec<(String, DeviceType)>) -> Self {
        Self {
            markers: markers
                .into_iter()
                .map(|(marker, device_type)| (marker.to_uppercase(), device_type))
                .collect(),
            fallback: DeviceType::Single,
        }
    }
}

impl Default for MarkerClassifier {
    fn default() -> Self {
        // Firmware prints family names with either Latin or Cyrillic letters
        Self::new(vec![
            ("AM8".to_string(), DeviceType::Octal),
            ("АМ8".to_string(), DeviceType::Octal),
            ("PM".to_string(), DeviceType::Quad),
            ("РМ".to_string(), DeviceType::Quad),
            ("AM1".to_string(), DeviceType::Single),
            ("АМ1".to_string(), DeviceType::Single),
        ])
    }
}

impl DeviceClassifier for MarkerClassifier {
    fn classify(&self, payload: &str) -> DeviceType {
        let upper = payload.to_uppercase();
        self.markers
            .iter()
            .find(|(marker, _)| upper.contains(marker.as_str()))
            .map(|(_, device_type)| *device_type)
            .unwrap_or(self.fallback)
    }
}
