//! Localized message templates
//!
//! Rendering is a pure function of `(alert, locale)`. Templates use the
//! placeholders `{pond}`, `{sensor}`, `{value}`, `{unit}` and `{reason}`.

use std::collections::HashMap;

use super::NotificationMessage;
use crate::models::Alert;

/// Maps an alert and a locale to a message
pub trait MessageCatalog: Send + Sync {
    fn render(&self, alert: &Alert, locale: &str) -> NotificationMessage;
}

/// Built-in English, French and Arabic templates
#[derive(Debug, Clone)]
pub struct StaticCatalog {
    default_locale: String,
    /// locale -> message key -> template
    templates: HashMap<&'static str, HashMap<&'static str, &'static str>>,
}

const EN: &[(&str, &str)] = &[
    ("critical_temp_high", "Critical high temperature: {value}{unit} in pond {pond}"),
    ("critical_temp_low", "Critical low temperature: {value}{unit} in pond {pond}"),
    ("critical_oxygen_low", "Critical low dissolved oxygen: {value}{unit} in pond {pond}"),
    ("critical_ph_high", "Critical high pH: {value}{unit} in pond {pond}"),
    ("critical_ph_low", "Critical low pH: {value}{unit} in pond {pond}"),
    ("critical_generic", "Critical {sensor} level: {value}{unit} in pond {pond}"),
    ("warning_temperature", "Temperature warning: {value}{unit} in pond {pond}"),
    ("warning_ph", "pH warning: {value}{unit} in pond {pond}"),
    ("warning_dissolved_oxygen", "Oxygen warning: {value}{unit} in pond {pond}"),
    ("warning_turbidity", "Turbidity warning: {value}{unit} in pond {pond}"),
    ("warning_ammonia", "Ammonia warning: {value}{unit} in pond {pond}"),
    ("warning_nitrate", "Nitrate warning: {value}{unit} in pond {pond}"),
    ("anomaly_detected", "Anomaly detected in pond {pond}: {sensor} shifted to {value}{unit}"),
    ("health_warning", "Pond {pond} health score is low: {value}"),
    ("health_critical", "Pond {pond} health score is critical: {value}"),
    ("stale_data", "No sensor data received from pond {pond} for over 1 hour"),
    ("daily_summary", "Daily summary for pond {pond}: {reason}"),
];

const FR: &[(&str, &str)] = &[
    ("critical_temp_high", "Température critique élevée: {value}{unit} dans le bassin {pond}"),
    ("critical_temp_low", "Température critique basse: {value}{unit} dans le bassin {pond}"),
    ("critical_oxygen_low", "Oxygène dissous critique: {value}{unit} dans le bassin {pond}"),
    ("critical_ph_high", "pH critique élevé: {value}{unit} dans le bassin {pond}"),
    ("critical_ph_low", "pH critique bas: {value}{unit} dans le bassin {pond}"),
    ("critical_generic", "Niveau critique ({sensor}): {value}{unit} dans le bassin {pond}"),
    ("warning_temperature", "Alerte température: {value}{unit} dans le bassin {pond}"),
    ("warning_ph", "Alerte pH: {value}{unit} dans le bassin {pond}"),
    ("warning_dissolved_oxygen", "Alerte oxygène: {value}{unit} dans le bassin {pond}"),
    ("warning_turbidity", "Alerte turbidité: {value}{unit} dans le bassin {pond}"),
    ("warning_ammonia", "Alerte ammoniac: {value}{unit} dans le bassin {pond}"),
    ("warning_nitrate", "Alerte nitrate: {value}{unit} dans le bassin {pond}"),
    ("anomaly_detected", "Anomalie détectée dans le bassin {pond}: {sensor} passe à {value}{unit}"),
    ("health_warning", "Score de santé faible pour le bassin {pond}: {value}"),
    ("health_critical", "Score de santé critique pour le bassin {pond}: {value}"),
    ("stale_data", "Aucune donnée reçue du bassin {pond} depuis plus d'1 heure"),
    ("daily_summary", "Résumé quotidien du bassin {pond}: {reason}"),
];

const AR: &[(&str, &str)] = &[
    ("critical_temp_high", "درجة حرارة حرجة عالية: {value}{unit} في الحوض {pond}"),
    ("critical_temp_low", "درجة حرارة حرجة منخفضة: {value}{unit} في الحوض {pond}"),
    ("critical_oxygen_low", "أكسجين منحل حرج: {value}{unit} في الحوض {pond}"),
    ("critical_ph_high", "رقم هيدروجيني حرج عالي: {value}{unit} في الحوض {pond}"),
    ("critical_ph_low", "رقم هيدروجيني حرج منخفض: {value}{unit} في الحوض {pond}"),
    ("critical_generic", "مستوى حرج ({sensor}): {value}{unit} في الحوض {pond}"),
    ("warning_temperature", "تحذير درجة الحرارة: {value}{unit} في الحوض {pond}"),
    ("warning_ph", "تحذير الرقم الهيدروجيني: {value}{unit} في الحوض {pond}"),
    ("warning_dissolved_oxygen", "تحذير الأكسجين: {value}{unit} في الحوض {pond}"),
    ("warning_turbidity", "تحذير العكارة: {value}{unit} في الحوض {pond}"),
    ("warning_ammonia", "تحذير الأمونيا: {value}{unit} في الحوض {pond}"),
    ("warning_nitrate", "تحذير النترات: {value}{unit} في الحوض {pond}"),
    ("anomaly_detected", "تم اكتشاف شذوذ في الحوض {pond}: {sensor} {value}{unit}"),
    ("health_warning", "مؤشر صحة الحوض {pond} منخفض: {value}"),
    ("health_critical", "مؤشر صحة الحوض {pond} حرج: {value}"),
    ("stale_data", "لم يتم استلام بيانات من الحوض {pond} لأكثر من ساعة"),
    ("daily_summary", "الملخص اليومي للحوض {pond}: {reason}"),
];

impl StaticCatalog {
    pub fn new(default_locale: impl Into<String>) -> Self {
        let templates = [("en", EN), ("fr", FR), ("ar", AR)]
            .into_iter()
            .map(|(locale, entries)| (locale, entries.iter().copied().collect()))
            .collect();
        Self {
            default_locale: default_locale.into(),
            templates,
        }
    }

    pub fn supports(&self, locale: &str) -> bool {
        self.templates.contains_key(locale)
    }

    fn template(&self, locale: &str, key: &str) -> Option<(&'static str, &'static str)> {
        let (locale, entries) = self.templates.get_key_value(locale)?;
        entries.get(key).map(|template| (*locale, *template))
    }
}

impl Default for StaticCatalog {
    fn default() -> Self {
        Self::new("en")
    }
}

impl MessageCatalog for StaticCatalog {
    fn render(&self, alert: &Alert, locale: &str) -> NotificationMessage {
        let (locale, body) = match self
            .template(locale, &alert.message_key)
            .or_else(|| self.template(&self.default_locale, &alert.message_key))
        {
            Some((locale, template)) => (locale.to_string(), fill(template, alert)),
            None => (locale.to_string(), alert.reason.clone()),
        };

        NotificationMessage {
            alert_id: alert.id,
            pond_id: alert.pond_id,
            severity: alert.severity,
            message_key: alert.message_key.clone(),
            locale,
            title: format!(
                "[{}] pond {} {}",
                alert.severity.as_str().to_uppercase(),
                alert.pond_id,
                alert.kind
            ),
            body,
            created_at: alert.created_at,
        }
    }
}

fn fill(template: &str, alert: &Alert) -> String {
    let value = match alert.value {
        Some(v) if v.fract() == 0.0 => format!("{}", v),
        Some(v) => format!("{:.2}", v),
        None => String::new(),
    };
    let (sensor, unit) = match alert.sensor_type {
        Some(sensor) => (sensor.as_str(), sensor.canonical_unit()),
        None => ("", ""),
    };

    template
        .replace("{pond}", &alert.pond_id.to_string())
        .replace("{sensor}", sensor)
        .replace("{value}", &value)
        .replace("{unit}", unit)
        .replace("{reason}", &alert.reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AlertKind, DedupKey, SensorType, Severity};
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    fn alert(message_key: &str, value: f64) -> Alert {
        Alert {
            id: Uuid::new_v4(),
            pond_id: 12,
            sensor_type: Some(SensorType::DissolvedOxygen),
            kind: AlertKind::LimitBreach,
            severity: Severity::Critical,
            reason: "dissolved_oxygen critical limit breached".to_string(),
            message_key: message_key.to_string(),
            value: Some(value),
            created_at: Utc.with_ymd_and_hms(2024, 6, 1, 4, 0, 0).unwrap(),
            dedup_key: DedupKey {
                pond_id: 12,
                sensor_type: Some(SensorType::DissolvedOxygen),
                kind: AlertKind::LimitBreach,
            },
        }
    }

    #[test]
    fn test_render_each_locale() {
        let catalog = StaticCatalog::default();
        let alert = alert("critical_oxygen_low", 1.5);

        let en = catalog.render(&alert, "en");
        assert_eq!(en.body, "Critical low dissolved oxygen: 1.50mg/L in pond 12");
        assert_eq!(en.title, "[CRITICAL] pond 12 limit_breach");

        let fr = catalog.render(&alert, "fr");
        assert_eq!(fr.locale, "fr");
        assert!(fr.body.starts_with("Oxygène dissous critique: 1.50mg/L"));

        let ar = catalog.render(&alert, "ar");
        assert!(ar.body.contains("الحوض 12"));
    }

    #[test]
    fn test_unknown_locale_falls_back_to_default() {
        let catalog = StaticCatalog::new("fr");
        let message = catalog.render(&alert("warning_dissolved_oxygen", 3.0), "de");
        assert_eq!(message.locale, "fr");
        assert_eq!(message.body, "Alerte oxygène: 3mg/L dans le bassin 12");
    }

    #[test]
    fn test_unknown_key_falls_back_to_reason() {
        let catalog = StaticCatalog::default();
        let alert = alert("no_such_key", 1.0);
        assert_eq!(catalog.render(&alert, "en").body, alert.reason);
        assert!(catalog.supports("ar"));
        assert!(!catalog.supports("de"));
    }
}
