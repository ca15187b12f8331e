//! SOAP `userAdd`
//!
//! N-central has no REST endpoint that creates users, so users go through
//! the legacy SOAP service. The API user name and its JWT (as password)
//! authenticate the call; without a user name the JWT is sent as a bearer
//! token instead, which some servers reject.

use std::collections::HashMap;

use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesText, Event};
use rand::Rng;
use rand::seq::SliceRandom;
use serde_json::Value as JsonValue;

use super::error::{ClientError, ClientErrorKind};
use crate::transfer::{Record, id_to_string};

const SOAP_ENV_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
const EI2_NS: &str = "http://ei2.nobj.nable.com/";

/// Credentials for the SOAP service
#[derive(Debug, Clone)]
pub struct SoapCredentials {
    pub username: Option<String>,
    pub jwt: String,
}

impl SoapCredentials {
    /// Token for the `Authorization` header when there is no user name
    pub fn bearer(&self) -> Option<&str> {
        self.username.is_none().then_some(self.jwt.as_str())
    }
}

/// The `userAdd` settings of one user
#[derive(Debug, Clone, PartialEq)]
pub struct NewUser {
    pub login: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub department: Option<String>,
    pub location: Option<String>,
    pub enabled: bool,
    /// Org unit the user belongs to
    pub customer_id: i64,
    pub role_ids: Vec<i64>,
    pub access_group_ids: Vec<i64>,
}

impl NewUser {
    /// Read a user record whose references already point at the destination
    pub fn from_record(record: &Record, service_org_id: i64) -> Result<Self, ClientError> {
        let text = |field: &str| {
            record
                .get(field)
                .and_then(JsonValue::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let ids = |field: &str| -> Vec<i64> {
            match record.get(field) {
                Some(JsonValue::Array(items)) => items
                    .iter()
                    .filter_map(|v| id_to_string(v).and_then(|s| s.parse().ok()))
                    .collect(),
                _ => Vec::new(),
            }
        };

        let login = text("userName").ok_or_else(|| {
            ClientError::new(ClientErrorKind::Validation, "User has no userName")
        })?;
        let customer_id = ["orgUnitId", "serviceOrgId"]
            .iter()
            .filter_map(|f| record.get(f).and_then(id_to_string))
            .find_map(|id| id.parse().ok())
            .unwrap_or(service_org_id);
        let enabled = match record.get("isEnabled").or_else(|| record.get("enabled")) {
            Some(JsonValue::Bool(b)) => *b,
            _ => !text("status").is_some_and(|s| s.eq_ignore_ascii_case("disabled")),
        };

        Ok(NewUser {
            email: text("email").unwrap_or_else(|| login.clone()),
            first_name: text("firstName").unwrap_or_default(),
            last_name: text("lastName").unwrap_or_default(),
            phone: text("phone"),
            department: text("department"),
            location: text("location"),
            enabled,
            customer_id,
            role_ids: ids("roleIds"),
            access_group_ids: ids("accessGroupIds"),
            login,
        })
    }

    fn settings(&self, password: &str) -> Vec<(&'static str, String)> {
        let join = |ids: &[i64]| {
            ids.iter()
                .map(i64::to_string)
                .collect::<Vec<_>>()
                .join(",")
        };

        let mut settings = vec![
            ("email", self.email.clone()),
            ("password", password.to_string()),
            ("customerID", self.customer_id.to_string()),
            ("firstname", self.first_name.clone()),
            ("lastname", self.last_name.clone()),
            ("username", self.login.clone()),
            (
                "status",
                if self.enabled { "enabled" } else { "disabled" }.to_string(),
            ),
        ];
        for (key, value) in [
            ("phone", &self.phone),
            ("department", &self.department),
            ("location", &self.location),
        ] {
            if let Some(value) = value {
                settings.push((key, value.clone()));
            }
        }
        if !self.role_ids.is_empty() {
            settings.push(("userroleID", join(&self.role_ids)));
        }
        if !self.access_group_ids.is_empty() {
            settings.push(("accessgroupids", join(&self.access_group_ids)));
        }
        settings.push(("mustchangepassword", "true".to_string()));
        settings
    }
}

/// Build the `userAdd` request envelope
pub fn user_add_envelope(
    credentials: &SoapCredentials,
    user: &NewUser,
    password: &str,
) -> Result<String, ClientError> {
    let mut writer = Writer::new(Vec::new());
    writer
        .create_element("soapenv:Envelope")
        .with_attribute(("xmlns:soapenv", SOAP_ENV_NS))
        .with_attribute(("xmlns:ei2", EI2_NS))
        .write_inner_content(|w| {
            w.create_element("soapenv:Header").write_empty()?;
            w.create_element("soapenv:Body").write_inner_content(|w| {
                w.create_element("ei2:userAdd").write_inner_content(|w| {
                    w.create_element("ei2:username")
                        .write_text_content(BytesText::new(
                            credentials.username.as_deref().unwrap_or_default(),
                        ))?;
                    w.create_element("ei2:password")
                        .write_text_content(BytesText::new(&credentials.jwt))?;
                    for (key, value) in user.settings(password) {
                        w.create_element("ei2:settings").write_inner_content(|w| {
                            w.create_element("ei2:key")
                                .write_text_content(BytesText::new(key))?;
                            w.create_element("ei2:value")
                                .write_text_content(BytesText::new(&value))?;
                            Ok(())
                        })?;
                    }
                    Ok(())
                })?;
                Ok(())
            })?;
            Ok(())
        })
        .map_err(|e| {
            ClientError::new(
                ClientErrorKind::InvalidResponse,
                format!("Failed to build userAdd request: {}", e),
            )
        })?;

    String::from_utf8(writer.into_inner()).map_err(|e| {
        ClientError::new(
            ClientErrorKind::InvalidResponse,
            format!("Failed to build userAdd request: {}", e),
        )
    })
}

/// Read the new user id out of a `userAdd` response
pub fn parse_user_add_response(status: u16, body: &str) -> Result<String, ClientError> {
    let values = element_texts(body)?;

    if let Some(fault) = values.get("faultstring") {
        let code = values.get("faultcode").map(String::as_str).unwrap_or("Unknown");
        let mut err = ClientError::new(
            ClientErrorKind::Validation,
            format!("SOAP fault [{}]: {}", code, fault),
        );
        err.status = Some(status);
        return Err(err);
    }
    if !(200..300).contains(&status) {
        return Err(ClientError::from_status(status, body));
    }

    let id = ["return", "userAddReturn"]
        .iter()
        .find_map(|tag| values.get(*tag))
        .ok_or_else(|| {
            ClientError::new(ClientErrorKind::InvalidResponse, "No user id in userAdd response")
        })?;
    match id.parse::<i64>() {
        Ok(id) if id > 0 => Ok(id.to_string()),
        Ok(id) => Err(ClientError::new(
            ClientErrorKind::Validation,
            format!("userAdd returned {}, the login may already exist", id),
        )),
        Err(_) => Err(ClientError::new(
            ClientErrorKind::InvalidResponse,
            format!("userAdd returned a non-numeric id '{}'", id),
        )),
    }
}

/// First text of every element, keyed by local name
fn element_texts(body: &str) -> Result<HashMap<String, String>, ClientError> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);

    let mut values = HashMap::new();
    let mut current: Option<String> = None;
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                current = Some(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
            }
            Ok(Event::Text(t)) => {
                if let Some(name) = current.take() {
                    values
                        .entry(name)
                        .or_insert_with(|| String::from_utf8_lossy(&t).into_owned());
                }
            }
            Ok(Event::End(_)) => current = None,
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(ClientError::new(
                    ClientErrorKind::InvalidResponse,
                    format!("Malformed SOAP response: {}", e),
                ));
            }
        }
    }
    Ok(values)
}

/// Initial password for a created user, who must change it on first login
pub fn generate_password() -> String {
    const LOWER: &[u8] = b"abcdefghijkmnopqrstuvwxyz";
    const UPPER: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ";
    const DIGITS: &[u8] = b"23456789";
    const SPECIAL: &[u8] = b"!@#$%^&*()-_=+";

    let mut rng = rand::rng();
    let mut pick = |set: &[u8]| set[rng.random_range(0..set.len())] as char;

    let mut chars: Vec<char> = vec![pick(LOWER), pick(UPPER), pick(DIGITS), pick(SPECIAL)];
    let all: Vec<u8> = [LOWER, UPPER, DIGITS, SPECIAL].concat();
    while chars.len() < 20 {
        chars.push(pick(all.as_slice()));
    }
    chars.shuffle(&mut rand::rng());
    chars.into_iter().collect()
}
