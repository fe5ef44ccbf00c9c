use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// A selectable option: the identifier sent by the client and the label shown to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Choice {
    pub id: &'static str,
    pub name: &'static str,
}

const fn choice(id: &'static str, name: &'static str) -> Choice {
    Choice { id, name }
}

/// Research services offered on the quote request form
pub const SERVICES: &[Choice] = &[
    choice("market-research", "Pazar Araştırması"),
    choice("customer-satisfaction", "Belediye Memnuniyeti Araştırması"),
    choice("brand-research", "Akademik Araştırmalar"),
    choice("product-testing", "Siyasi Araştırmalar"),
    choice("competitor-analysis", "Rakip Analizi"),
    choice("other", "Diğer"),
];

pub const EDUCATION_LEVELS: &[Choice] = &[
    choice("ilkokul", "İlkokul"),
    choice("ortaokul", "Ortaokul"),
    choice("lise", "Lise"),
    choice("onlisans", "Ön Lisans"),
    choice("lisans", "Lisans"),
    choice("yukseklisans", "Yüksek Lisans"),
    choice("doktora", "Doktora"),
];

pub const EXPERIENCE_LEVELS: &[Choice] = &[
    choice("yok", "Deneyimim yok"),
    choice("1-yildan-az", "1 yıldan az"),
    choice("1-3-yil", "1-3 yıl"),
    choice("3-5-yil", "3-5 yıl"),
    choice("5-yildan-fazla", "5 yıldan fazla"),
];

pub const AVAILABILITY: &[Choice] = &[
    choice("tam-zamanli", "Tam zamanlı çalışabilirim"),
    choice("yarim-zamanli", "Yarı zamanlı çalışabilirim"),
    choice("hafta-sonu", "Sadece hafta sonları çalışabilirim"),
    choice("proje-bazli", "Proje bazlı çalışabilirim"),
];

/// Translate a service identifier to its display name.
///
/// Identifiers missing from [`SERVICES`] are returned unchanged.
pub fn service_name(id: &str) -> &str {
    match SERVICES.iter().find(|service| service.id == id) {
        Some(service) => service.name,
        None => id,
    }
}

/// Quote request ("Teklif Alın") form data
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuoteRecord {
    pub name: String,
    pub email: String,
    pub phone: String,
    /// Optional, never validated
    pub company: String,
    pub subject: String,
    pub message: String,
    /// Selected service identifiers, in selection order
    pub services: Vec<String>,
}

impl QuoteRecord {
    /// Select the service if it is not selected yet, deselect it otherwise.
    pub fn toggle_service(&mut self, id: &str) {
        if let Some(position) = self.services.iter().position(|s| s == id) {
            self.services.remove(position);
        } else {
            self.services.push(id.to_string());
        }
    }

    /// Row written to the `quote_requests` table. Services stay as identifiers.
    pub fn to_row(&self) -> Value {
        json!({
            "name": self.name,
            "email": self.email,
            "phone": self.phone,
            "company": self.company,
            "subject": self.subject,
            "message": self.message,
            "services": self.services,
        })
    }

    /// Body posted to the form relay, with services rendered as a readable list.
    pub fn to_relay_payload(&self) -> Value {
        let services = self
            .services
            .iter()
            .map(|id| service_name(id))
            .collect::<Vec<_>>()
            .join(", ");

        json!({
            "name": self.name,
            "email": self.email,
            "phone": self.phone,
            "company": self.company,
            "subject": self.subject,
            "message": self.message,
            "services": services,
        })
    }
}

/// Surveyor application ("Anketör Başvuru Formu") form data
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ApplicationRecord {
    pub full_name: String,
    pub email: String,
    pub phone: String,
    pub city: String,
    pub district: String,
    pub education: String,
    pub experience: String,
    pub availability: String,
    pub about: String,
    /// Consent to the privacy policy
    pub agreement: bool,
}

impl ApplicationRecord {
    /// Row written to the `anketor_applications` table. The agreement flag is not stored.
    pub fn to_row(&self) -> Value {
        json!({
            "full_name": self.full_name,
            "email": self.email,
            "phone": self.phone,
            "city": self.city,
            "district": self.district,
            "education": self.education,
            "experience": self.experience,
            "availability": self.availability,
            "about": self.about,
        })
    }
}
