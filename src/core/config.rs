use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::error::ComprobanteError;
use super::types::Issuer;

/// SUNAT sendBill endpoints.
const BETA_URL: &str = "https://e-beta.sunat.gob.pe/ol-ti-itcpfegem-beta/billService";
const PROD_URL: &str = "https://e-factura.sunat.gob.pe/ol-ti-itcpfegem/billService";

/// Target environment of the tax authority web service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Environment {
    /// Test environment. Known quirks: may omit the receipt entirely or
    /// return an empty one.
    Beta,
    Production,
}

impl Environment {
    /// Default sendBill URL for this environment.
    pub fn endpoint_url(&self) -> &'static str {
        match self {
            Self::Beta => BETA_URL,
            Self::Production => PROD_URL,
        }
    }
}

/// SOL credentials for the WS-Security header.
///
/// The protocol only supports cleartext passwords in the UsernameToken;
/// there is no hashed variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolCredentials {
    /// RUC of the issuing company.
    pub ruc: String,
    /// Secondary SOL user.
    pub sol_user: String,
    /// SOL password.
    pub sol_password: String,
}

impl SolCredentials {
    /// WS-Security username: RUC concatenated with the SOL user
    /// (e.g. `20000000001MODDATOS`).
    pub fn username(&self) -> String {
        format!("{}{}", self.ruc, self.sol_user)
    }

    /// Published test credentials for the Beta environment.
    pub fn beta() -> Self {
        Self {
            ruc: "20000000001".into(),
            sol_user: "MODDATOS".into(),
            sol_password: "MODDATOS".into(),
        }
    }
}

/// SMTP settings for the optional notification sink. Every field is typed
/// and required once the block is present; optionality lives at the
/// `Option<SmtpConfig>` level, not in per-field lookups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    pub use_tls: bool,
    /// Sender address.
    pub from: String,
}

/// Engine configuration, validated once at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub environment: Environment,
    /// Overrides the environment's default sendBill URL (e.g. an OSE or a
    /// local stub).
    pub endpoint_override: Option<String>,
    pub credentials: SolCredentials,
    pub issuer: Issuer,
    /// IGV rate as a fraction (0.18 = 18%).
    pub tax_rate: Decimal,
    /// Permit transmission of unsigned documents when signing fails.
    /// Only honored outside production.
    pub allow_unsigned: bool,
    pub smtp: Option<SmtpConfig>,
}

impl EngineConfig {
    /// Configuration for the Beta environment with the published test
    /// credentials and the standard 18% IGV.
    pub fn beta(issuer: Issuer) -> Self {
        Self {
            environment: Environment::Beta,
            endpoint_override: None,
            credentials: SolCredentials::beta(),
            issuer,
            tax_rate: dec!(0.18),
            allow_unsigned: false,
            smtp: None,
        }
    }

    /// Effective sendBill URL.
    pub fn endpoint(&self) -> &str {
        self.endpoint_override
            .as_deref()
            .unwrap_or_else(|| self.environment.endpoint_url())
    }

    /// Whether a signing failure may degrade to unsigned transmission.
    /// Never true in production.
    pub fn degraded_signing_allowed(&self) -> bool {
        self.allow_unsigned && self.environment != Environment::Production
    }

    /// Validate the configuration. Called once at engine construction.
    pub fn validate(&self) -> Result<(), ComprobanteError> {
        if self.credentials.ruc.len() != 11
            || !self.credentials.ruc.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(ComprobanteError::Validation(format!(
                "credentials.ruc '{}' is not an 11-digit RUC",
                self.credentials.ruc
            )));
        }
        if self.issuer.ruc != self.credentials.ruc {
            return Err(ComprobanteError::Validation(
                "issuer.ruc does not match credentials.ruc".into(),
            ));
        }
        if self.tax_rate <= Decimal::ZERO || self.tax_rate >= Decimal::ONE {
            return Err(ComprobanteError::Validation(format!(
                "tax_rate {} must be a fraction between 0 and 1",
                self.tax_rate
            )));
        }
        if self.allow_unsigned && self.environment == Environment::Production {
            return Err(ComprobanteError::Validation(
                "allow_unsigned is not permitted in production".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issuer() -> Issuer {
        Issuer {
            ruc: "20000000001".into(),
            registration_name: "LABORATORIO CLINICO SAC".into(),
            trade_name: None,
            street: Some("Av. Principal 123".into()),
            city: "LIMA".into(),
            district: "LIMA".into(),
            subdivision: "LIMA".into(),
        }
    }

    #[test]
    fn beta_defaults_validate() {
        let config = EngineConfig::beta(issuer());
        config.validate().unwrap();
        assert_eq!(config.credentials.username(), "20000000001MODDATOS");
        assert!(config.endpoint().contains("e-beta.sunat.gob.pe"));
    }

    #[test]
    fn endpoint_override_wins() {
        let mut config = EngineConfig::beta(issuer());
        config.endpoint_override = Some("http://localhost:9999/billService".into());
        assert_eq!(config.endpoint(), "http://localhost:9999/billService");
    }

    #[test]
    fn unsigned_forbidden_in_production() {
        let mut config = EngineConfig::beta(issuer());
        config.environment = Environment::Production;
        config.allow_unsigned = true;
        assert!(config.validate().is_err());
        assert!(!config.degraded_signing_allowed());
    }

    #[test]
    fn rejects_bad_ruc() {
        let mut config = EngineConfig::beta(issuer());
        config.credentials.ruc = "123".into();
        assert!(config.validate().is_err());
    }
}
