use crate::config::Config;
use crate::connection::DbConnection;
use crate::directory::{Catalog, PUBLIC_ROLE};
use anyhow::Result;
use ascii_table::AsciiTable;
use log::info;

/// Print the current state of every role named in the config.
pub fn inspect(config: &Config) -> Result<()> {
    let mut conn = DbConnection::connect_to_database(&config.connection, None)?;

    let mut names = config
        .requests
        .iter()
        .flat_map(|r| r.roles())
        .filter(|r| r != PUBLIC_ROLE)
        .collect::<Vec<_>>();
    names.sort();
    names.dedup();

    let mut rows = vec![
        vec![
            "Role".to_string(),
            "Exists".to_string(),
            "Attributes".to_string(),
            "Conn Limit".to_string(),
            "Valid Until".to_string(),
            "Groups".to_string(),
            "Members".to_string(),
        ],
        vec![
            "---".to_string(),
            "---".to_string(),
            "---".to_string(),
            "---".to_string(),
            "---".to_string(),
            "---".to_string(),
            "---".to_string(),
        ],
    ];

    for name in &names {
        rows.push(role_row(&mut conn, name)?);
    }

    let term_width = term_size::dimensions().map(|(w, _)| w).unwrap_or(120).saturating_sub(5);

    let mut table = AsciiTable::default();
    table.set_max_width(term_width);

    info!(
        "Roles in {} (server {}):\n{}",
        conn.connection_info(),
        conn.server_version(),
        table.format(rows)
    );

    Ok(())
}

/// One table row: attributes, the groups a role is in and its members.
fn role_row<C: Catalog>(catalog: &mut C, name: &str) -> Result<Vec<String>> {
    let snapshot = match catalog.role_attributes(name, false)? {
        Some(snapshot) => snapshot,
        None => {
            let mut row = vec![name.to_string(), "no".to_string()];
            row.resize(7, String::new());
            return Ok(row);
        }
    };

    let groups = catalog.groups_of(name)?.into_iter().collect::<Vec<_>>();
    let members = catalog.members_of(name)?.into_iter().collect::<Vec<_>>();

    Ok(vec![
        name.to_string(),
        "yes".to_string(),
        snapshot.attrs.enabled(),
        match snapshot.conn_limit {
            -1 => "unlimited".to_string(),
            limit => limit.to_string(),
        },
        snapshot.valid_until.unwrap_or_default(),
        groups.join(", "),
        members.join(", "),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::MemoryCluster;

    #[test]
    fn test_role_row() {
        let mut cluster = MemoryCluster::new();
        cluster.add_role("readonly").conn_limit = 3;
        cluster.add_role("alice");
        cluster.add_role("bob");
        cluster.add_membership("readonly", "alice");
        cluster.add_membership("readonly", "bob");

        let row = role_row(&mut cluster, "readonly").unwrap();
        assert_eq!(row[0], "readonly");
        assert_eq!(row[1], "yes");
        assert_eq!(row[3], "3");
        assert_eq!(row[5], "");
        assert_eq!(row[6], "alice, bob");

        let row = role_row(&mut cluster, "alice").unwrap();
        assert_eq!(row[3], "unlimited");
        assert_eq!(row[5], "readonly");
        assert_eq!(row[6], "");
    }

    #[test]
    fn test_role_row_missing() {
        let mut cluster = MemoryCluster::new();
        let row = role_row(&mut cluster, "ghost").unwrap();
        assert_eq!(row.len(), 7);
        assert_eq!(row[1], "no");
    }
}
