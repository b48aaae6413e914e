use crate::directory::{AttributeSnapshot, StoredPassword};
use crate::error::ValidationError;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Role attribute that can be toggled with `FLAG` / `NOFLAG`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RoleFlag {
    Superuser,
    CreateRole,
    CreateDb,
    Inherit,
    Login,
    Replication,
    BypassRls,
}

impl RoleFlag {
    pub const ALL: [RoleFlag; 7] = [
        RoleFlag::Superuser,
        RoleFlag::CreateRole,
        RoleFlag::CreateDb,
        RoleFlag::Inherit,
        RoleFlag::Login,
        RoleFlag::Replication,
        RoleFlag::BypassRls,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RoleFlag::Superuser => "SUPERUSER",
            RoleFlag::CreateRole => "CREATEROLE",
            RoleFlag::CreateDb => "CREATEDB",
            RoleFlag::Inherit => "INHERIT",
            RoleFlag::Login => "LOGIN",
            RoleFlag::Replication => "REPLICATION",
            RoleFlag::BypassRls => "BYPASSRLS",
        }
    }

    /// Server version (`server_version_num`) that introduced the flag.
    pub fn since_version(&self) -> Option<u32> {
        match self {
            RoleFlag::BypassRls => Some(90500),
            _ => None,
        }
    }

    fn from_keyword(keyword: &str) -> Option<Self> {
        RoleFlag::ALL.into_iter().find(|f| f.as_str() == keyword)
    }

    /// `CREATEDB` for true, `NOCREATEDB` for false.
    pub fn keyword(&self, value: bool) -> String {
        if value {
            self.as_str().to_string()
        } else {
            format!("NO{}", self.as_str())
        }
    }
}

impl fmt::Display for RoleFlag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

pub fn is_flag_supported(flag: RoleFlag, server_version: u32) -> bool {
    flag.since_version()
        .map_or(true, |since| server_version >= since)
}

/// Flags usable against one server, computed once per connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    server_version: u32,
    flags: BTreeSet<RoleFlag>,
}

impl Capabilities {
    pub fn new(server_version: u32) -> Self {
        let flags = RoleFlag::ALL
            .into_iter()
            .filter(|f| is_flag_supported(*f, server_version))
            .collect();

        Self {
            server_version,
            flags,
        }
    }

    /// Capabilities of the newest server, used for offline validation.
    pub fn latest() -> Self {
        Self::new(u32::MAX)
    }

    pub fn server_version(&self) -> u32 {
        self.server_version
    }

    pub fn supports(&self, flag: RoleFlag) -> bool {
        self.flags.contains(&flag)
    }
}

/// Boolean attributes of a role, one per [`RoleFlag`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoleAttrs {
    pub superuser: bool,
    pub createrole: bool,
    pub createdb: bool,
    pub inherit: bool,
    pub login: bool,
    pub replication: bool,
    pub bypassrls: bool,
}

impl RoleAttrs {
    pub fn get(&self, flag: RoleFlag) -> bool {
        match flag {
            RoleFlag::Superuser => self.superuser,
            RoleFlag::CreateRole => self.createrole,
            RoleFlag::CreateDb => self.createdb,
            RoleFlag::Inherit => self.inherit,
            RoleFlag::Login => self.login,
            RoleFlag::Replication => self.replication,
            RoleFlag::BypassRls => self.bypassrls,
        }
    }

    pub fn set(&mut self, flag: RoleFlag, value: bool) {
        let field = match flag {
            RoleFlag::Superuser => &mut self.superuser,
            RoleFlag::CreateRole => &mut self.createrole,
            RoleFlag::CreateDb => &mut self.createdb,
            RoleFlag::Inherit => &mut self.inherit,
            RoleFlag::Login => &mut self.login,
            RoleFlag::Replication => &mut self.replication,
            RoleFlag::BypassRls => &mut self.bypassrls,
        };
        *field = value;
    }

    /// Space separated keywords of the flags that are set, e.g. `LOGIN INHERIT`.
    pub fn enabled(&self) -> String {
        RoleFlag::ALL
            .into_iter()
            .filter(|f| self.get(*f))
            .map(|f| f.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Requested attribute flags, e.g. `CREATEDB,NOSUPERUSER`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlagRequest(BTreeMap<RoleFlag, bool>);

impl FlagRequest {
    /// Parse a comma separated flag string, rejecting unknown flags and
    /// flags the server is too old for.
    pub fn parse(flags: &str, capabilities: &Capabilities) -> Result<Self, ValidationError> {
        let mut parsed = BTreeMap::new();
        let mut invalid = vec![];

        let tokens = flags
            .split(',')
            .map(|t| t.trim().to_uppercase())
            .filter(|t| !t.is_empty());
        for token in tokens {
            let flag = match RoleFlag::from_keyword(&token) {
                Some(flag) => Some((flag, true)),
                None => token
                    .strip_prefix("NO")
                    .and_then(RoleFlag::from_keyword)
                    .map(|flag| (flag, false)),
            };

            match flag {
                Some((flag, value)) if capabilities.supports(flag) => {
                    if let Some(previous) = parsed.insert(flag, value) {
                        if previous != value {
                            return Err(ValidationError::ConflictingFlags(flag.to_string()));
                        }
                    }
                }
                _ => invalid.push(token),
            }
        }

        if !invalid.is_empty() {
            return Err(ValidationError::InvalidFlags(invalid));
        }

        Ok(Self(parsed))
    }

    pub fn from_pairs<I: IntoIterator<Item = (RoleFlag, bool)>>(pairs: I) -> Self {
        Self(pairs.into_iter().collect())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (RoleFlag, bool)> + '_ {
        self.0.iter().map(|(f, v)| (*f, *v))
    }

    /// Normalized flag clause, e.g. `CREATEDB NOSUPERUSER`.
    pub fn to_clause(&self) -> String {
        self.iter()
            .map(|(flag, value)| flag.keyword(value))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

pub fn is_md5_hash(password: &str) -> bool {
    password.len() == 35 && password.starts_with("md5")
}

/// The hash PostgreSQL stores for an md5 password: `md5` + md5(password || role).
pub fn md5_role_hash(role: &str, password: &str) -> String {
    format!("md5{:x}", md5::compute(format!("{}{}", password, role)))
}

/// Attribute changes requested for a role. `None` leaves a field unmanaged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeRequest {
    pub password: Option<String>,
    pub flags: FlagRequest,
    pub expires: Option<String>,
    pub conn_limit: Option<i32>,
}

impl AttributeRequest {
    pub fn is_empty(&self) -> bool {
        self.password.is_none()
            && self.flags.is_empty()
            && self.expires.is_none()
            && self.conn_limit.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PasswordChange {
    /// plaintext or an md5 hash, always stored encrypted
    Set(String),
    Clear,
}

/// The clauses a CREATE or ALTER statement has to carry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeChanges {
    pub password: Option<PasswordChange>,
    pub valid_until: Option<String>,
    pub conn_limit: Option<i32>,
    pub flags: FlagRequest,
}

impl AttributeChanges {
    /// Every requested clause, for a role that does not exist yet.
    pub fn for_new_role(request: &AttributeRequest) -> Self {
        Self {
            password: request
                .password
                .as_ref()
                .filter(|p| !p.is_empty())
                .map(|p| PasswordChange::Set(p.clone())),
            valid_until: request.expires.clone(),
            conn_limit: request.conn_limit,
            flags: request.flags.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.password.is_none()
            && self.valid_until.is_none()
            && self.conn_limit.is_none()
            && self.flags.is_empty()
    }
}

/// Whether the stored password differs from the requested one.
///
/// An empty request means "no password". Requests already in md5 form are
/// compared verbatim, plaintext is hashed with the role name first. When
/// the stored value cannot be read a change is assumed.
pub fn password_needs_change(role: &str, stored: &StoredPassword, requested: &str) -> bool {
    match stored {
        StoredPassword::Unreadable => true,
        StoredPassword::Absent => !requested.is_empty(),
        StoredPassword::Hash(current) => {
            if requested.is_empty() {
                true
            } else if is_md5_hash(requested) {
                requested != current
            } else {
                md5_role_hash(role, requested) != *current
            }
        }
    }
}

/// Compare a role's current attributes with the requested ones.
///
/// `resolved_expiry` is the requested expiry after the server's own
/// timestamp coercion, so that it compares equal to the stored value.
pub fn detect_changes(
    role: &str,
    current: &AttributeSnapshot,
    request: &AttributeRequest,
    resolved_expiry: Option<&str>,
    no_password_changes: bool,
) -> AttributeChanges {
    let mut changes = AttributeChanges::default();

    if !no_password_changes {
        if let Some(password) = &request.password {
            if password_needs_change(role, &current.password, password) {
                changes.password = Some(if password.is_empty() {
                    PasswordChange::Clear
                } else {
                    PasswordChange::Set(password.clone())
                });
            }
        }
    }

    changes.flags = FlagRequest::from_pairs(
        request
            .flags
            .iter()
            .filter(|(flag, value)| current.attrs.get(*flag) != *value),
    );

    if let Some(expires) = &request.expires {
        if resolved_expiry != current.valid_until.as_deref() {
            changes.valid_until = Some(expires.clone());
        }
    }

    changes.conn_limit = request
        .conn_limit
        .filter(|limit| *limit != current.conn_limit);

    changes
}
