//! Field extraction from upstream plate API payloads.
//!
//! The upstream has answered in two shapes over time: flat top-level fields,
//! and a nested "vehicle data" container using Portuguese field names. Each
//! shape has its own extractor; `extract_vehicle` tries them in order and the
//! first one that recognises the payload wins.
//!
//! The field helpers never fail. They return a normalized value, `None`, or
//! `Category::Outro`. `parse_year_strict` is the one place that rejects input,
//! for callers that want a hard validation error.

use crate::plate::ValidationError;
use crate::types::Category;
use chrono::Datelike;
use serde_json::{Map, Value};

/// Vehicle fields pulled out of an upstream payload, already normalized.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedVehicle {
    pub plate: Option<String>,
    pub make: Option<String>,
    pub model: Option<String>,
    pub manufacture_year: Option<u16>,
    pub model_year: Option<u16>,
    pub category: Category,
    pub color: Option<String>,
    pub chassis: Option<String>,
    pub registration_id: Option<String>,
    pub markers: Vec<String>,
}

pub type Extractor = fn(&Value) -> Option<ExtractedVehicle>;

/// Tried in order; nested first since its container key is unambiguous.
pub const EXTRACTORS: &[(&str, Extractor)] = &[("nested", extract_nested), ("flat", extract_flat)];

const VEHICLE_CONTAINERS: &[&str] = &[
    "dados_veiculo",
    "dadosVeiculo",
    "vehicle_data",
    "vehicleData",
    "veiculo",
];

const PLATE_KEYS: &[&str] = &["plate", "placa", "PLACA"];
const MAKE_KEYS: &[&str] = &["make", "brand", "marca", "MARCA"];
const MODEL_KEYS: &[&str] = &["model", "modelo", "MODELO"];
const MAKE_MODEL_KEYS: &[&str] = &["marcaModelo", "marca_modelo", "MARCA_MODELO"];
const MANUFACTURE_YEAR_KEYS: &[&str] = &["manufactureYear", "anoFabricacao", "ano_fabricacao", "ano"];
const MODEL_YEAR_KEYS: &[&str] = &["modelYear", "anoModelo", "ano_modelo"];
const CATEGORY_KEYS: &[&str] = &["category", "categoria", "segmento", "tipo_veiculo", "tipo"];
const COLOR_KEYS: &[&str] = &["color", "cor", "COR"];
const CHASSIS_KEYS: &[&str] = &["chassis", "chassi", "CHASSI"];
const REGISTRATION_KEYS: &[&str] = &["registrationId", "renavam", "RENAVAM"];

/// Run the extractor list over `body`. Errors when no shape matches or the
/// matched shape carries neither make nor model.
pub fn extract_vehicle(body: &Value) -> Result<ExtractedVehicle, String> {
    for (name, extractor) in EXTRACTORS {
        if let Some(mut vehicle) = extractor(body) {
            if vehicle.make.is_none() && vehicle.model.is_none() {
                return Err(format!("{} payload has neither make nor model", name));
            }
            vehicle.markers.insert(0, format!("shape:{}", name));
            return Ok(vehicle);
        }
    }
    Err("unrecognised payload shape".to_string())
}

pub fn extract_nested(body: &Value) -> Option<ExtractedVehicle> {
    let obj = body.as_object()?;
    let (container, inner) = VEHICLE_CONTAINERS
        .iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_object).map(|m| (*k, m)))?;
    let mut vehicle = read_fields(inner);
    vehicle.markers.insert(0, format!("container:{}", container));
    // Some nested payloads keep the plate next to the container.
    if vehicle.plate.is_none() {
        vehicle.plate = pick(obj, PLATE_KEYS, &mut vehicle.markers)
            .and_then(|v| extract_text(Some(v)))
            .map(|p| crate::plate::normalize(&p));
    }
    Some(vehicle)
}

pub fn extract_flat(body: &Value) -> Option<ExtractedVehicle> {
    let obj = body.as_object()?;
    let recognised = MAKE_KEYS
        .iter()
        .chain(MODEL_KEYS)
        .chain(MAKE_MODEL_KEYS)
        .any(|k| obj.contains_key(*k));
    if !recognised {
        return None;
    }
    Some(read_fields(obj))
}

fn read_fields(obj: &Map<String, Value>) -> ExtractedVehicle {
    let mut markers = Vec::new();
    let plate = pick(obj, PLATE_KEYS, &mut markers).and_then(|v| extract_text(Some(v)));
    let mut make = extract_brand(pick(obj, MAKE_KEYS, &mut markers));
    let mut model = extract_text(pick(obj, MODEL_KEYS, &mut markers));
    if make.is_none() || model.is_none() {
        if let Some(combined) = pick(obj, MAKE_MODEL_KEYS, &mut markers).and_then(|v| extract_text(Some(v))) {
            let (m, md) = split_make_model(&combined);
            make = make.or(m);
            model = model.or(md);
        }
    }
    let manufacture_year = extract_year(pick(obj, MANUFACTURE_YEAR_KEYS, &mut markers));
    let model_year = extract_year(pick(obj, MODEL_YEAR_KEYS, &mut markers));
    let category = map_category(
        pick(obj, CATEGORY_KEYS, &mut markers)
            .and_then(|v| extract_text(Some(v)))
            .as_deref(),
    );
    let color = extract_text(pick(obj, COLOR_KEYS, &mut markers)).map(|c| title_case(&c));
    let chassis = extract_text(pick(obj, CHASSIS_KEYS, &mut markers)).map(|c| c.to_uppercase());
    let registration_id = extract_text(pick(obj, REGISTRATION_KEYS, &mut markers));
    ExtractedVehicle {
        plate: plate.map(|p| crate::plate::normalize(&p)),
        make,
        model,
        manufacture_year,
        model_year,
        category,
        color,
        chassis,
        registration_id,
        markers,
    }
}

// First non-null value among `keys`; records a marker when a non-canonical name was used.
fn pick<'a>(obj: &'a Map<String, Value>, keys: &[&str], markers: &mut Vec<String>) -> Option<&'a Value> {
    for (i, key) in keys.iter().enumerate() {
        match obj.get(*key) {
            Some(Value::Null) | None => continue,
            Some(v) => {
                if i > 0 {
                    markers.push(format!("field:{}", key));
                }
                return Some(v);
            }
        }
    }
    None
}

/// Trimmed non-empty text; numbers are rendered as text. Anything else is `None`.
pub fn extract_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn max_year() -> i64 {
    i64::from(chrono::Utc::now().year()) + 1
}

fn year_in_range(year: i64) -> Option<u16> {
    if (1900..=max_year()).contains(&year) {
        u16::try_from(year).ok()
    } else {
        None
    }
}

fn raw_year(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => {
            // "2015/2016" style values carry manufacture/model together; take the first.
            let head = s.trim().split('/').next().unwrap_or("").trim();
            head.parse::<i64>().ok()
        }
        _ => None,
    }
}

/// Year from a number or numeric string, `None` when absent or outside
/// 1900..=next year.
pub fn extract_year(value: Option<&Value>) -> Option<u16> {
    value.and_then(raw_year).and_then(year_in_range)
}

/// Strict variant of `extract_year` for user-entered data.
pub fn parse_year_strict(field: &'static str, value: &Value) -> Result<u16, ValidationError> {
    let invalid = || ValidationError::InvalidField {
        field,
        value: match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        },
    };
    let year = raw_year(value).ok_or_else(invalid)?;
    year_in_range(year).ok_or_else(invalid)
}

const BRAND_ALIASES: &[(&str, &str)] = &[
    ("VW", "Volkswagen"),
    ("VOLKS", "Volkswagen"),
    ("VOLKSWAGEN", "Volkswagen"),
    ("GM", "Chevrolet"),
    ("CHEV", "Chevrolet"),
    ("CHEVROLET", "Chevrolet"),
    ("MB", "Mercedes-Benz"),
    ("M.BENZ", "Mercedes-Benz"),
    ("MBENZ", "Mercedes-Benz"),
    ("MERCEDES", "Mercedes-Benz"),
    ("MERCEDES-BENZ", "Mercedes-Benz"),
    ("BMW", "BMW"),
    ("KIA", "Kia"),
    ("JAC", "JAC"),
    ("CAOA CHERY", "Caoa Chery"),
    ("LR", "Land Rover"),
    ("LAND ROVER", "Land Rover"),
];

/// Brand name from values like `"VW"`, `"VW - VOLKSWAGEN"`, `"I/BMW"` or a
/// combined `"FIAT/UNO MILLE"`. `None` when nothing usable is present.
pub fn extract_brand(value: Option<&Value>) -> Option<String> {
    let text = extract_text(value)?;
    let text = strip_import_prefix(&text);
    let head = text.split('/').next().unwrap_or("").trim();
    let head = head.split(" - ").next().unwrap_or("").trim();
    if head.is_empty() || head.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(canonical_brand(head))
}

fn canonical_brand(raw: &str) -> String {
    let upper = raw.to_uppercase();
    BRAND_ALIASES
        .iter()
        .find(|(alias, _)| *alias == upper)
        .map(|(_, name)| name.to_string())
        .unwrap_or_else(|| title_case(raw))
}

fn strip_import_prefix(text: &str) -> &str {
    // Imported vehicles are registered as "I/<BRAND> <MODEL>".
    text.strip_prefix("I/")
        .or_else(|| text.strip_prefix("i/"))
        .unwrap_or(text)
        .trim()
}

/// Split `"VW/GOL 1.0"` or `"I/BMW X1 SDRIVE"` into make and model.
pub fn split_make_model(combined: &str) -> (Option<String>, Option<String>) {
    let text = strip_import_prefix(combined);
    let (make, model) = match text.split_once('/') {
        Some((m, rest)) => (m.trim(), rest.trim()),
        None => match text.split_once(' ') {
            Some((m, rest)) => (m.trim(), rest.trim()),
            None => (text, ""),
        },
    };
    let make = extract_brand(Some(&Value::String(make.to_string())));
    let model = if model.is_empty() {
        None
    } else {
        Some(model.to_string())
    };
    (make, model)
}

const CATEGORY_TABLE: &[(&str, Category)] = &[
    ("auto", Category::Carro),
    ("automovel", Category::Carro),
    ("carro", Category::Carro),
    ("passeio", Category::Carro),
    ("sedan", Category::Carro),
    ("hatch", Category::Carro),
    ("suv", Category::Carro),
    ("moto", Category::Moto),
    ("motocicleta", Category::Moto),
    ("motoneta", Category::Moto),
    ("ciclomotor", Category::Moto),
    ("scooter", Category::Moto),
    ("triciclo", Category::Moto),
    ("quadriciclo", Category::Moto),
    ("caminhao", Category::Caminhao),
    ("pickup", Category::Caminhao),
    ("pick-up", Category::Caminhao),
    ("caminhonete", Category::Caminhao),
    ("camioneta", Category::Caminhao),
    ("trator", Category::Caminhao),
    ("van", Category::Van),
    ("utilitario", Category::Van),
    ("furgao", Category::Van),
    ("furgoneta", Category::Van),
    ("onibus", Category::Onibus),
    ("microonibus", Category::Onibus),
    ("micro-onibus", Category::Onibus),
];

/// Map an upstream category/segment label to `Category`. Unknown, empty or
/// missing labels map to `Category::Outro`.
pub fn map_category(raw: Option<&str>) -> Category {
    let Some(raw) = raw else {
        return Category::Outro;
    };
    let folded = fold(raw);
    if folded.is_empty() {
        return Category::Outro;
    }
    if let Some(c) = lookup_category(&folded) {
        return c;
    }
    folded
        .split(|c: char| c.is_whitespace() || c == '/' || c == ',')
        .filter(|w| !w.is_empty())
        .find_map(lookup_category)
        .unwrap_or(Category::Outro)
}

fn lookup_category(word: &str) -> Option<Category> {
    CATEGORY_TABLE
        .iter()
        .find(|(label, _)| *label == word)
        .map(|(_, c)| *c)
}

// Lowercase and strip the Portuguese diacritics the upstream uses.
fn fold(raw: &str) -> String {
    raw.trim()
        .chars()
        .flat_map(char::to_lowercase)
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
            'é' | 'ê' | 'è' => 'e',
            'í' | 'î' => 'i',
            'ó' | 'ô' | 'õ' | 'ö' => 'o',
            'ú' | 'ü' => 'u',
            'ç' => 'c',
            other => other,
        })
        .collect()
}

fn title_case(raw: &str) -> String {
    raw.split_whitespace()
        .map(|w| {
            let lower = w.to_lowercase();
            let mut chars = lower.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
