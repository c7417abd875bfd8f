//! Credential types and field identifiers.
//!
//! Both credential sets are persisted as flat key/string records (see
//! [`crate::store`]). Values are zeroized when dropped and never printed in
//! clear by `Debug`.

use super::ConfigError;
use crate::store::Record;
use std::fmt;
use std::str::FromStr;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Longest accepted credential value, in bytes.
pub const MAX_CREDENTIAL_LEN: usize = 127;

/// Record name for WLAN credentials.
pub const WIFI_NAMESPACE: &str = "wifi";

/// Record name for cellular (APN) credentials.
pub const CELLULAR_NAMESPACE: &str = "cellular";

pub const DEFAULT_APN: &str = "internet.ng.airtel.com";
pub const DEFAULT_APN_USER: &str = "internet";
pub const DEFAULT_APN_PASSWORD: &str = "internet";

/// Field of the WLAN record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WifiField {
    Ssid,
    Password,
}

impl WifiField {
    pub const ALL: [WifiField; 2] = [WifiField::Ssid, WifiField::Password];

    /// Key inside the `wifi` record.
    pub fn key(self) -> &'static str {
        match self {
            Self::Ssid => "ssid",
            Self::Password => "password",
        }
    }

    pub fn is_secret(self) -> bool {
        matches!(self, Self::Password)
    }
}

/// Field of the cellular record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CellularField {
    Apn,
    User,
    Password,
}

impl CellularField {
    pub const ALL: [CellularField; 3] = [
        CellularField::Apn,
        CellularField::User,
        CellularField::Password,
    ];

    /// Key inside the `cellular` record.
    pub fn key(self) -> &'static str {
        match self {
            Self::Apn => "apn",
            Self::User => "user",
            Self::Password => "pass",
        }
    }

    pub fn is_secret(self) -> bool {
        matches!(self, Self::Password)
    }
}

/// Any provisionable credential field.
///
/// Text form is `<namespace>.<key>`, e.g. `wifi.ssid` or `cellular.apn`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialField {
    Wifi(WifiField),
    Cellular(CellularField),
}

impl CredentialField {
    pub fn namespace(self) -> &'static str {
        match self {
            Self::Wifi(_) => WIFI_NAMESPACE,
            Self::Cellular(_) => CELLULAR_NAMESPACE,
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            Self::Wifi(f) => f.key(),
            Self::Cellular(f) => f.key(),
        }
    }

    pub fn is_secret(self) -> bool {
        match self {
            Self::Wifi(f) => f.is_secret(),
            Self::Cellular(f) => f.is_secret(),
        }
    }

    /// Every field, WLAN first.
    pub fn all() -> impl Iterator<Item = CredentialField> {
        WifiField::ALL
            .into_iter()
            .map(Self::Wifi)
            .chain(CellularField::ALL.into_iter().map(Self::Cellular))
    }
}

impl fmt::Display for CredentialField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace(), self.key())
    }
}

impl FromStr for CredentialField {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Self::all()
            .find(|field| field.to_string() == normalized)
            .ok_or_else(|| ConfigError::UnknownField(s.to_string()))
    }
}

/// Render a value for logs, masking secrets.
pub fn display_value(field: CredentialField, value: &str) -> String {
    if field.is_secret() {
        "****".to_string()
    } else {
        value.to_string()
    }
}

/// WLAN station credentials.
#[derive(Clone, Default, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct WifiCredentials {
    pub ssid: String,
    pub password: String,
}

impl WifiCredentials {
    pub fn new(ssid: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            ssid: ssid.into(),
            password: password.into(),
        }
    }

    /// Both SSID and password present; probing is skipped otherwise.
    pub fn is_configured(&self) -> bool {
        !self.ssid.is_empty() && !self.password.is_empty()
    }

    /// Build from a stored record; absent keys are empty.
    pub fn from_record(record: &Record) -> Self {
        let get = |field: WifiField| record.get(field.key()).cloned().unwrap_or_default();
        Self {
            ssid: get(WifiField::Ssid),
            password: get(WifiField::Password),
        }
    }

    pub fn to_record(&self) -> Record {
        let mut record = Record::new();
        record.insert(WifiField::Ssid.key().to_string(), self.ssid.clone());
        record.insert(WifiField::Password.key().to_string(), self.password.clone());
        record
    }

    pub fn set(&mut self, field: WifiField, value: &str) {
        let slot = match field {
            WifiField::Ssid => &mut self.ssid,
            WifiField::Password => &mut self.password,
        };
        slot.zeroize();
        slot.push_str(value);
    }
}

impl fmt::Debug for WifiCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WifiCredentials")
            .field("ssid", &self.ssid)
            .field("password", &"****")
            .finish()
    }
}

/// GPRS access point credentials.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct CellularCredentials {
    pub apn: String,
    pub user: String,
    pub password: String,
}

impl Default for CellularCredentials {
    fn default() -> Self {
        Self {
            apn: DEFAULT_APN.to_string(),
            user: DEFAULT_APN_USER.to_string(),
            password: DEFAULT_APN_PASSWORD.to_string(),
        }
    }
}

impl CellularCredentials {
    pub fn new(
        apn: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            apn: apn.into(),
            user: user.into(),
            password: password.into(),
        }
    }

    /// Build from a stored record; absent keys take the documented defaults.
    pub fn from_record(record: &Record) -> Self {
        let defaults = Self::default();
        let get = |field: CellularField, fallback: &str| {
            record
                .get(field.key())
                .cloned()
                .unwrap_or_else(|| fallback.to_string())
        };
        Self {
            apn: get(CellularField::Apn, &defaults.apn),
            user: get(CellularField::User, &defaults.user),
            password: get(CellularField::Password, &defaults.password),
        }
    }

    pub fn to_record(&self) -> Record {
        let mut record = Record::new();
        record.insert(CellularField::Apn.key().to_string(), self.apn.clone());
        record.insert(CellularField::User.key().to_string(), self.user.clone());
        record.insert(
            CellularField::Password.key().to_string(),
            self.password.clone(),
        );
        record
    }

    pub fn set(&mut self, field: CellularField, value: &str) {
        let slot = match field {
            CellularField::Apn => &mut self.apn,
            CellularField::User => &mut self.user,
            CellularField::Password => &mut self.password,
        };
        slot.zeroize();
        slot.push_str(value);
    }
}

impl fmt::Debug for CellularCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CellularCredentials")
            .field("apn", &self.apn)
            .field("user", &self.user)
            .field("password", &"****")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_parse_and_display() {
        let field: CredentialField = "wifi.ssid".parse().unwrap();
        assert_eq!(field, CredentialField::Wifi(WifiField::Ssid));

        let field: CredentialField = " Cellular.PASS ".parse().unwrap();
        assert_eq!(field, CredentialField::Cellular(CellularField::Password));
        assert_eq!(field.to_string(), "cellular.pass");

        assert!(matches!(
            "wifi.channel".parse::<CredentialField>(),
            Err(ConfigError::UnknownField(_))
        ));
    }

    #[test]
    fn test_all_fields_distinct() {
        let names: Vec<String> = CredentialField::all().map(|f| f.to_string()).collect();
        assert_eq!(
            names,
            vec![
                "wifi.ssid",
                "wifi.password",
                "cellular.apn",
                "cellular.user",
                "cellular.pass"
            ]
        );
    }

    #[test]
    fn test_missing_records_use_defaults() {
        let wifi = WifiCredentials::from_record(&Record::new());
        assert!(!wifi.is_configured());
        assert!(wifi.ssid.is_empty());

        let cell = CellularCredentials::from_record(&Record::new());
        assert_eq!(cell.apn, "internet.ng.airtel.com");
        assert_eq!(cell.user, "internet");
        assert_eq!(cell.password, "internet");
    }

    #[test]
    fn test_partial_cellular_record() {
        let mut record = Record::new();
        record.insert("apn".to_string(), "web.gprs".to_string());
        let cell = CellularCredentials::from_record(&record);
        assert_eq!(cell.apn, "web.gprs");
        assert_eq!(cell.user, DEFAULT_APN_USER);
    }

    #[test]
    fn test_wifi_requires_both_fields() {
        assert!(!WifiCredentials::new("FieldNet", "").is_configured());
        assert!(!WifiCredentials::new("", "secret").is_configured());
        assert!(WifiCredentials::new("FieldNet", "secret").is_configured());
    }

    #[test]
    fn test_debug_masks_passwords() {
        let wifi = WifiCredentials::new("FieldNet", "hunter22");
        let cell = CellularCredentials::new("apn", "user", "topsecret");

        assert!(!format!("{:?}", wifi).contains("hunter22"));
        assert!(!format!("{:?}", cell).contains("topsecret"));
        assert_eq!(
            display_value(CredentialField::Wifi(WifiField::Password), "hunter22"),
            "****"
        );
        assert_eq!(
            display_value(CredentialField::Wifi(WifiField::Ssid), "FieldNet"),
            "FieldNet"
        );
    }

    #[test]
    fn test_set_replaces_value() {
        let mut cell = CellularCredentials::default();
        cell.set(CellularField::Apn, "m2m.carrier");
        assert_eq!(cell.apn, "m2m.carrier");
        assert_eq!(
            cell.to_record().get("apn").map(String::as_str),
            Some("m2m.carrier")
        );
    }
}
