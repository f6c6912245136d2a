//! REGISTER request construction
//!
//! A REGISTER is rendered once per registration attempt from a
//! [`RegisterParams`] value and never changed afterwards. The header order is
//! fixed so that captured requests can be compared line by line.

use uuid::Uuid;

use crate::error::{Error, Result};
use crate::message::build_request;
use crate::token::{random_branch, random_token};

/// Methods advertised in the Allow header
pub const ALLOWED_METHODS: &str = "INVITE,ACK,CANCEL,BYE,UPDATE,MESSAGE,OPTIONS,REFER,INFO,NOTIFY";

/// Option tags advertised in the Supported header
pub const SUPPORTED_OPTIONS: &str = "path,gruu,outbound";

/// Max-Forwards value sent on the REGISTER
pub const MAX_FORWARDS: u32 = 69;

/// Everything needed to render one REGISTER request
///
/// The first seven fields come from configuration; the rest are fresh
/// per-session identifiers produced by [`RegisterParams::generate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterParams {
    /// User part of the address-of-record
    pub agent_id: String,
    /// SIP domain; host part of the AOR and the Request-URI
    pub domain: String,
    /// User-Agent header value
    pub user_agent: String,
    /// Requested binding lifetime in seconds
    pub expires: u32,
    /// Device instance identifier sent as `+sip.instance`
    pub instance_id: Uuid,
    /// Outbound `reg-id` parameter
    pub reg_id: u32,
    /// Whether to advertise `+sip.ice` on the Contact
    pub ice_support: bool,
    /// Pseudo host used in Via and Contact
    pub local_host: String,
    /// Random user part of the Contact URI
    pub contact_user: String,
    /// Call-ID header value
    pub call_id: String,
    /// From tag
    pub from_tag: String,
    /// Via branch, including the magic cookie
    pub branch: String,
}

impl RegisterParams {
    /// Build parameters with freshly generated Call-ID, tag, branch and
    /// contact identifiers
    pub fn generate(
        agent_id: impl Into<String>,
        domain: impl Into<String>,
        user_agent: impl Into<String>,
        expires: u32,
        instance_id: Uuid,
        reg_id: u32,
        ice_support: bool,
    ) -> Result<Self> {
        let agent_id = agent_id.into();
        let domain = domain.into();
        if agent_id.trim().is_empty() {
            return Err(Error::MissingField("agent_id"));
        }
        if domain.trim().is_empty() {
            return Err(Error::MissingField("domain"));
        }

        Ok(Self {
            agent_id,
            domain,
            user_agent: user_agent.into(),
            expires,
            instance_id,
            reg_id,
            ice_support,
            local_host: format!("{}.invalid", random_token(12)),
            contact_user: random_token(8),
            call_id: random_token(22),
            from_tag: random_token(10),
            branch: random_branch(10),
        })
    }

    /// Address-of-record, `sip:agent@domain`
    pub fn aor(&self) -> String {
        format!("sip:{}@{}", self.agent_id, self.domain)
    }

    /// Contact header value
    pub fn contact(&self) -> String {
        let mut contact = format!("<sip:{}@{};transport=wss>", self.contact_user, self.local_host);
        if self.ice_support {
            contact.push_str(";+sip.ice");
        }
        contact.push_str(&format!(
            ";reg-id={};+sip.instance=\"<urn:uuid:{}>\";expires={}",
            self.reg_id, self.instance_id, self.expires
        ));
        contact
    }
}

/// Render the REGISTER request text
///
/// # Examples
///
/// ```rust
/// use wsreg_sip_core::{build_register, RegisterParams, SipMessage};
/// use uuid::Uuid;
///
/// let params = RegisterParams::generate(
///     "1001", "pbx.example.com", "wsreg/0.1", 600, Uuid::new_v4(), 1, true,
/// ).unwrap();
/// let text = build_register(&params);
///
/// let parsed = SipMessage::parse(&text).unwrap();
/// assert_eq!(parsed.start_line(), "REGISTER sip:pbx.example.com SIP/2.0");
/// assert_eq!(parsed.cseq(), Some((1, "REGISTER")));
/// ```
pub fn build_register(params: &RegisterParams) -> String {
    let aor = params.aor();
    let headers = [
        (
            "Via",
            format!("SIP/2.0/WSS {};branch={}", params.local_host, params.branch),
        ),
        ("Max-Forwards", MAX_FORWARDS.to_string()),
        ("To", format!("<{}>", aor)),
        ("From", format!("<{}>;tag={}", aor, params.from_tag)),
        ("Call-ID", params.call_id.clone()),
        ("CSeq", "1 REGISTER".to_string()),
        ("Contact", params.contact()),
        ("Expires", params.expires.to_string()),
        ("Allow", ALLOWED_METHODS.to_string()),
        ("Supported", SUPPORTED_OPTIONS.to_string()),
        ("User-Agent", params.user_agent.clone()),
    ];

    build_request(
        "REGISTER",
        &format!("sip:{}", params.domain),
        headers,
        "",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::SipMessage;

    fn fixed_params() -> RegisterParams {
        RegisterParams {
            agent_id: "1001".to_string(),
            domain: "pbx.example.com".to_string(),
            user_agent: "wsreg/0.1.0".to_string(),
            expires: 600,
            instance_id: Uuid::parse_str("6f1c2a0e-3b7d-4c55-9a1e-2f4d8b6c0a11").unwrap(),
            reg_id: 1,
            ice_support: true,
            local_host: "k3j9x2m1q8w4.invalid".to_string(),
            contact_user: "a1b2c3d4".to_string(),
            call_id: "callid0123456789abcdef".to_string(),
            from_tag: "tag0123456".to_string(),
            branch: "z9hG4bKbranch0001".to_string(),
        }
    }

    #[test]
    fn test_register_fixture() {
        let expected = "REGISTER sip:pbx.example.com SIP/2.0\r\n\
            Via: SIP/2.0/WSS k3j9x2m1q8w4.invalid;branch=z9hG4bKbranch0001\r\n\
            Max-Forwards: 69\r\n\
            To: <sip:1001@pbx.example.com>\r\n\
            From: <sip:1001@pbx.example.com>;tag=tag0123456\r\n\
            Call-ID: callid0123456789abcdef\r\n\
            CSeq: 1 REGISTER\r\n\
            Contact: <sip:a1b2c3d4@k3j9x2m1q8w4.invalid;transport=wss>;+sip.ice;reg-id=1;+sip.instance=\"<urn:uuid:6f1c2a0e-3b7d-4c55-9a1e-2f4d8b6c0a11>\";expires=600\r\n\
            Expires: 600\r\n\
            Allow: INVITE,ACK,CANCEL,BYE,UPDATE,MESSAGE,OPTIONS,REFER,INFO,NOTIFY\r\n\
            Supported: path,gruu,outbound\r\n\
            User-Agent: wsreg/0.1.0\r\n\
            Content-Length: 0\r\n\
            \r\n";

        assert_eq!(build_register(&fixed_params()), expected);
    }

    #[test]
    fn test_contact_without_ice() {
        let mut params = fixed_params();
        params.ice_support = false;
        params.reg_id = 2;
        params.expires = 30;
        assert_eq!(
            params.contact(),
            "<sip:a1b2c3d4@k3j9x2m1q8w4.invalid;transport=wss>;reg-id=2;\
             +sip.instance=\"<urn:uuid:6f1c2a0e-3b7d-4c55-9a1e-2f4d8b6c0a11>\";expires=30"
        );
    }

    #[test]
    fn test_generate_fills_identifiers() {
        let params = RegisterParams::generate(
            "agent", "example.com", "ua", 300, Uuid::new_v4(), 1, false,
        )
        .unwrap();

        assert!(params.branch.starts_with("z9hG4bK"));
        assert!(params.local_host.ends_with(".invalid"));
        assert_eq!(params.call_id.len(), 22);
        assert_eq!(params.from_tag.len(), 10);
        assert_eq!(params.contact_user.len(), 8);
        assert_eq!(params.aor(), "sip:agent@example.com");
    }

    #[test]
    fn test_generate_requires_identity() {
        let id = Uuid::new_v4();
        assert_eq!(
            RegisterParams::generate("", "example.com", "ua", 300, id, 1, true),
            Err(Error::MissingField("agent_id"))
        );
        assert_eq!(
            RegisterParams::generate("1001", "  ", "ua", 300, id, 1, true),
            Err(Error::MissingField("domain"))
        );
    }

    #[test]
    fn test_register_parses_back() {
        let params = fixed_params();
        let msg = SipMessage::parse(&build_register(&params)).unwrap();

        assert!(!msg.is_response());
        assert_eq!(msg.method(), Some("REGISTER"));
        assert_eq!(msg.call_id(), Some("callid0123456789abcdef"));
        assert_eq!(msg.header("expires"), Some("600"));
        assert_eq!(msg.header("content-length"), Some("0"));
        assert_eq!(msg.body(), "");
    }
}
