use sb_schema::AppId;

/// Claim types carried by the token frameworks we interoperate with.
const APP_ID_CLAIM: &str = "appid";
const AUTHORIZED_PARTY_CLAIM: &str = "azp";
const AUDIENCE_CLAIM: &str = "aud";
const VERSION_CLAIM: &str = "ver";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    pub claim_type: String,
    pub value: String,
}

impl Claim {
    pub fn new(claim_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            claim_type: claim_type.into(),
            value: value.into(),
        }
    }
}

/// The validated claim set for the current call, supplied by the surrounding
/// host's auth layer. The relay only ever reads the caller app id out of it.
#[derive(Debug, Clone, Default)]
pub struct ClaimsIdentity {
    claims: Vec<Claim>,
}

impl ClaimsIdentity {
    pub fn new(claims: Vec<Claim>) -> Self {
        Self { claims }
    }

    pub fn anonymous() -> Self {
        Self { claims: Vec::new() }
    }

    pub fn claim_value(&self, claim_type: &str) -> Option<&str> {
        self.claims
            .iter()
            .find(|c| c.claim_type == claim_type)
            .map(|c| c.value.as_str())
    }

    /// Resolve the calling application's id.
    ///
    /// v1 tokens carry it in `appid`, v2 tokens in `azp`; tokens minted
    /// bot-to-bot carry only the audience. Empty values count as absent.
    pub fn app_id(&self) -> Option<AppId> {
        let version = self.claim_value(VERSION_CLAIM).unwrap_or("1.0");
        let preferred = if version == "2.0" {
            self.claim_value(AUTHORIZED_PARTY_CLAIM)
        } else {
            self.claim_value(APP_ID_CLAIM)
        };
        let raw = preferred
            .or_else(|| self.claim_value(APP_ID_CLAIM))
            .or_else(|| self.claim_value(AUTHORIZED_PARTY_CLAIM))
            .or_else(|| self.claim_value(AUDIENCE_CLAIM))?;
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        Some(AppId::new(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v1_token_uses_appid_claim() {
        let identity = ClaimsIdentity::new(vec![
            Claim::new("ver", "1.0"),
            Claim::new("appid", "skill-app-1"),
            Claim::new("aud", "host-app"),
        ]);
        assert_eq!(identity.app_id().map(String::from), Some("skill-app-1".to_string()));
    }

    #[test]
    fn v2_token_uses_authorized_party() {
        let identity = ClaimsIdentity::new(vec![
            Claim::new("ver", "2.0"),
            Claim::new("azp", "skill-app-2"),
            Claim::new("appid", "stale-value"),
        ]);
        assert_eq!(identity.app_id().map(String::from), Some("skill-app-2".to_string()));
    }

    #[test]
    fn falls_back_to_audience() {
        let identity = ClaimsIdentity::new(vec![Claim::new("aud", "caller-app")]);
        assert_eq!(identity.app_id().map(String::from), Some("caller-app".to_string()));
    }

    #[test]
    fn anonymous_identity_has_no_app_id() {
        assert!(ClaimsIdentity::anonymous().app_id().is_none());
    }

    #[test]
    fn blank_claim_values_count_as_absent() {
        let identity = ClaimsIdentity::new(vec![Claim::new("appid", "   ")]);
        assert!(identity.app_id().is_none());
    }
}
