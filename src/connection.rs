use crate::attributes::{RoleAttrs, RoleFlag};
use crate::config::{Connection, SslMode};
use crate::directory::{AttributeSnapshot, Catalog, ReadError, StoredPassword};
use crate::privilege::{Privilege, PrivilegeSet, QualifiedTable};
use crate::sql::{quote_ident, ExecError, Session, Statement};
use anyhow::{anyhow, Context, Result};
use log::{debug, warn};
use native_tls::{Certificate, TlsConnector};
use postgres::error::SqlState;
use postgres::row::Row;
use postgres::{Client, NoTls};
use postgres_native_tls::MakeTlsConnector;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

const AUTHID_SAVEPOINT: &str = "pgrole_read_authid";

/// One client connection, used for both catalog reads and the statements
/// of a single request.
pub struct DbConnection {
    connection_info: String,
    client: Client,
    server_version: u32,
    in_transaction: bool,
}

impl DbConnection {
    /// Connect with `connection`, re-targeted to `database` when given,
    /// then switch to its `session_role`.
    pub fn connect_to_database(connection: &Connection, database: Option<&str>) -> Result<Self> {
        let mut config: postgres::Config = connection
            .url
            .parse()
            .context("invalid connection url")?;
        if let Some(database) = database {
            config.dbname(database);
        }

        let ssl_mode = effective_ssl_mode(&config, connection.ssl_mode);
        config.ssl_mode(driver_ssl_mode(ssl_mode));

        let connection_info = format!(
            "{}@{}",
            config.get_user().unwrap_or("postgres"),
            config.get_dbname().unwrap_or("postgres")
        );
        let connected = match tls_connector(ssl_mode, connection.ca_cert.as_deref())? {
            Some(connector) => config.connect(MakeTlsConnector::new(connector)),
            None => config.connect(NoTls),
        };
        let mut client =
            connected.with_context(|| format!("could not connect to {}", connection_info))?;

        let row = client.query_one("SHOW server_version_num", &[])?;
        let version: String = row.get(0);
        let server_version = version
            .trim()
            .parse::<u32>()
            .with_context(|| format!("unexpected server_version_num: {}", version))?;
        debug!(
            "connected to {} (server {}, sslmode {:?})",
            connection_info, server_version, ssl_mode
        );

        if let Some(role) = &connection.session_role {
            client
                .batch_execute(&format!("SET ROLE {}", quote_ident(role)))
                .with_context(|| format!("could not switch to role {}", role))?;
        }

        Ok(Self {
            connection_info,
            client,
            server_version,
            in_transaction: false,
        })
    }

    pub fn connect(url: &str) -> Result<Self> {
        let connection = Connection {
            url: url.to_string(),
            ..Default::default()
        };
        Self::connect_to_database(&connection, None)
    }

    /// `user@database` of the connection
    pub fn connection_info(&self) -> &str {
        &self.connection_info
    }

    fn attribute_columns(&self) -> &'static str {
        if self.server_version >= RoleFlag::BypassRls.since_version().unwrap_or(0) {
            "rolsuper, rolcreaterole, rolcreatedb, rolinherit, rolcanlogin, rolreplication, \
             rolbypassrls, rolvaliduntil::text AS rolvaliduntil, rolconnlimit"
        } else {
            "rolsuper, rolcreaterole, rolcreatedb, rolinherit, rolcanlogin, rolreplication, \
             false AS rolbypassrls, rolvaliduntil::text AS rolvaliduntil, rolconnlimit"
        }
    }

    fn query_authid(&mut self, name: &str) -> Result<Option<Row>, postgres::Error> {
        let sql = format!(
            "SELECT {}, rolpassword FROM pg_authid WHERE rolname = $1",
            self.attribute_columns()
        );
        self.client.query_opt(sql.as_str(), &[&name])
    }
}

/// `ssl_mode` of the config wins over the `sslmode` of the url.
fn effective_ssl_mode(config: &postgres::Config, requested: Option<SslMode>) -> SslMode {
    match requested {
        Some(mode) => mode,
        None => match config.get_ssl_mode() {
            postgres::config::SslMode::Disable => SslMode::Disable,
            postgres::config::SslMode::Require => SslMode::Require,
            _ => SslMode::Prefer,
        },
    }
}

fn driver_ssl_mode(mode: SslMode) -> postgres::config::SslMode {
    match mode {
        SslMode::Disable => postgres::config::SslMode::Disable,
        SslMode::Allow | SslMode::Prefer => postgres::config::SslMode::Prefer,
        SslMode::Require | SslMode::VerifyCa | SslMode::VerifyFull => {
            postgres::config::SslMode::Require
        }
    }
}

/// `None` for plain connections. Like libpq, `require` and weaker modes
/// only check the certificate chain when a root certificate is given, and
/// only `verify-full` checks the host name.
fn tls_connector(mode: SslMode, ca_cert: Option<&Path>) -> Result<Option<TlsConnector>> {
    if mode == SslMode::Disable {
        return Ok(None);
    }

    let mut builder = TlsConnector::builder();
    if let Some(path) = ca_cert {
        let pem = fs::read(path)
            .with_context(|| format!("could not read ca_cert {}", path.display()))?;
        let certificate = Certificate::from_pem(&pem)
            .with_context(|| format!("invalid ca_cert {}", path.display()))?;
        builder.add_root_certificate(certificate);
    }

    match mode {
        SslMode::Allow | SslMode::Prefer | SslMode::Require if ca_cert.is_none() => {
            builder.danger_accept_invalid_certs(true);
        }
        SslMode::VerifyFull => {}
        _ => {
            builder.danger_accept_invalid_hostnames(true);
        }
    }

    let connector = builder.build().context("could not set up TLS")?;
    Ok(Some(connector))
}

fn decode_snapshot(row: &Row, password: StoredPassword) -> AttributeSnapshot {
    AttributeSnapshot {
        attrs: RoleAttrs {
            superuser: row.get("rolsuper"),
            createrole: row.get("rolcreaterole"),
            createdb: row.get("rolcreatedb"),
            inherit: row.get("rolinherit"),
            login: row.get("rolcanlogin"),
            replication: row.get("rolreplication"),
            bypassrls: row.get("rolbypassrls"),
        },
        password,
        valid_until: row.get("rolvaliduntil"),
        conn_limit: row.get("rolconnlimit"),
    }
}

fn error_message(e: &postgres::Error) -> String {
    match e.as_db_error() {
        Some(db_error) => db_error.message().to_string(),
        None => e.to_string(),
    }
}

/// Map a driver error to the two failure kinds a statement can have.
fn classify(e: postgres::Error) -> ExecError {
    if e.code() == Some(&SqlState::READ_ONLY_SQL_TRANSACTION) {
        ExecError::ReadOnly(error_message(&e))
    } else {
        ExecError::Failed(error_message(&e))
    }
}

impl Catalog for DbConnection {
    fn server_version(&self) -> u32 {
        self.server_version
    }

    fn find_role(&mut self, name: &str) -> Result<bool> {
        let row = self
            .client
            .query_opt("SELECT 1 FROM pg_roles WHERE rolname = $1", &[&name])?;
        Ok(row.is_some())
    }

    fn read_authid(&mut self, name: &str) -> Result<Option<AttributeSnapshot>, ReadError> {
        // A failed read would abort the surrounding transaction
        if self.in_transaction {
            self.savepoint(AUTHID_SAVEPOINT)
                .map_err(|e| anyhow!("{}", e))?;
        }

        let result = self.query_authid(name);

        if self.in_transaction {
            let cleanup = match &result {
                Ok(_) => self.release_savepoint(AUTHID_SAVEPOINT),
                Err(_) => self.rollback_to_savepoint(AUTHID_SAVEPOINT),
            };
            cleanup.map_err(|e| anyhow!("{}", e))?;
        }

        match result {
            Ok(row) => Ok(row.map(|row| {
                let password = match row.get::<_, Option<String>>("rolpassword") {
                    Some(hash) => StoredPassword::Hash(hash),
                    None => StoredPassword::Absent,
                };
                decode_snapshot(&row, password)
            })),
            Err(e) if e.code() == Some(&SqlState::INSUFFICIENT_PRIVILEGE) => {
                Err(ReadError::AccessDenied(error_message(&e)))
            }
            Err(e) => Err(ReadError::Other(e.into())),
        }
    }

    fn read_roles(&mut self, name: &str) -> Result<Option<AttributeSnapshot>> {
        let sql = format!(
            "SELECT {} FROM pg_roles WHERE rolname = $1",
            self.attribute_columns()
        );
        let row = self.client.query_opt(sql.as_str(), &[&name])?;
        Ok(row.map(|row| decode_snapshot(&row, StoredPassword::Unreadable)))
    }

    fn groups_of(&mut self, member: &str) -> Result<BTreeSet<String>> {
        let sql = "
            SELECT g.rolname
            FROM pg_auth_members m
              JOIN pg_roles g ON g.oid = m.roleid
              JOIN pg_roles r ON r.oid = m.member
            WHERE r.rolname = $1
        ";
        let rows = self.client.query(sql, &[&member])?;
        Ok(rows.iter().map(|row| row.get(0)).collect())
    }

    fn members_of(&mut self, group: &str) -> Result<BTreeSet<String>> {
        let sql = "
            SELECT r.rolname
            FROM pg_auth_members m
              JOIN pg_roles g ON g.oid = m.roleid
              JOIN pg_roles r ON r.oid = m.member
            WHERE g.rolname = $1
        ";
        let rows = self.client.query(sql, &[&group])?;
        Ok(rows.iter().map(|row| row.get(0)).collect())
    }

    fn table_privileges(&mut self, role: &str, table: &QualifiedTable) -> Result<PrivilegeSet> {
        let sql = "
            SELECT privilege_type
            FROM information_schema.role_table_grants
            WHERE grantee = $1 AND table_schema = $2 AND table_name = $3
        ";
        let rows = self
            .client
            .query(sql, &[&role, &table.schema, &table.name])?;

        let mut privileges = PrivilegeSet::new();
        for row in rows {
            let name: String = row.get(0);
            match name.parse::<Privilege>() {
                Ok(privilege) => {
                    privileges.insert(privilege);
                }
                Err(_) => debug!("ignoring privilege {} on {}", name, table),
            }
        }

        Ok(privileges)
    }

    fn database_acl(&mut self, database: &str) -> Result<Option<String>> {
        let row = self.client.query_opt(
            "SELECT datacl::text FROM pg_database WHERE datname = $1",
            &[&database],
        )?;

        match row {
            Some(row) => Ok(row.get(0)),
            None => {
                warn!("database {} does not exist", database);
                Ok(None)
            }
        }
    }

    fn resolve_timestamp(&mut self, literal: &str) -> Result<String> {
        let row = self
            .client
            .query_one("SELECT $1::text::timestamptz::text", &[&literal])?;
        Ok(row.get(0))
    }
}

impl Session for DbConnection {
    fn begin(&mut self) -> Result<()> {
        self.client.batch_execute("BEGIN")?;
        self.in_transaction = true;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.client.batch_execute("COMMIT")?;
        self.in_transaction = false;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.client.batch_execute("ROLLBACK")?;
        self.in_transaction = false;
        Ok(())
    }

    fn execute(&mut self, statement: &Statement) -> Result<(), ExecError> {
        debug!("execute: {}", statement);
        self.client
            .batch_execute(&statement.to_sql())
            .map_err(classify)
    }

    fn savepoint(&mut self, name: &str) -> Result<(), ExecError> {
        self.client
            .batch_execute(&format!("SAVEPOINT {}", quote_ident(name)))
            .map_err(classify)
    }

    fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), ExecError> {
        self.client
            .batch_execute(&format!("ROLLBACK TO SAVEPOINT {}", quote_ident(name)))
            .map_err(classify)
    }

    fn release_savepoint(&mut self, name: &str) -> Result<(), ExecError> {
        self.client
            .batch_execute(&format!("RELEASE SAVEPOINT {}", quote_ident(name)))
            .map_err(classify)
    }
}
