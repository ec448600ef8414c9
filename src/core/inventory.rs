//! Final manifest of endpoints and credential references.

use crate::constants;
use crate::core::store;
use crate::models::inventory::{InventoryEntry, InventoryRecord};
use crate::models::service::{Access, CredentialRef, ServiceDefinition};
use anyhow::Result;
use chrono::{DateTime, Utc};
use comfy_table::{presets::UTF8_FULL, Attribute, Cell, Color, Table};
use std::collections::BTreeMap;
use std::path::Path;

const INVENTORY_HEADER: &str = "# hostforge inventory. Regenerated on every run; edits are overwritten.\n\
# Credentials are references into secrets.toml, never values.\n\n";

const ADMIN_PANEL: &str = "admin-panel";

fn credential_text(credential: &CredentialRef) -> String {
    match credential {
        CredentialRef::Secret(name) => format!("secret:{}", name),
        CredentialRef::DefaultLogin(login) => format!("default login {}; rotate now", login),
        CredentialRef::SetOnFirstLogin => "set on first login".to_string(),
        CredentialRef::None => "none".to_string(),
    }
}

fn endpoint(host: &str, service: &ServiceDefinition) -> String {
    match service.access {
        Access::Web { scheme, port } => format!("{}://{}:{}", scheme.as_str(), host, port),
        Access::Internal { port } => format!(
            "{}:{} (platform network only)",
            service.name, port
        ),
    }
}

/// Compose the manifest for the deployed services. Reads nothing from the host.
pub fn render(
    host: &str,
    services: &[&ServiceDefinition],
    panel_enabled: bool,
    secrets_file: &Path,
    now: DateTime<Utc>,
) -> InventoryRecord {
    let mut entries = BTreeMap::new();
    for service in services {
        entries.insert(
            service.name.to_string(),
            InventoryEntry {
                endpoint: endpoint(host, service),
                credential: credential_text(&service.credential),
                description: Some(service.description.to_string()),
            },
        );
    }
    if panel_enabled {
        entries.insert(
            ADMIN_PANEL.to_string(),
            InventoryEntry {
                endpoint: format!("https://{}:{}", host, constants::PORT_ADMIN_PANEL),
                credential: "host system account".to_string(),
                description: Some("Host administration panel".to_string()),
            },
        );
    }
    InventoryRecord {
        generated_at: now,
        host: host.to_string(),
        secrets_file: secrets_file.display().to_string(),
        services: entries,
    }
}

/// Persist the manifest owner-only, replacing the previous one.
pub fn write(path: &Path, record: &InventoryRecord) -> Result<()> {
    store::save(path, record, INVENTORY_HEADER, constants::STATE_FILE_MODE)
}

pub fn summary_table(record: &InventoryRecord) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec![
        Cell::new("Service").add_attribute(Attribute::Bold),
        Cell::new("Endpoint").add_attribute(Attribute::Bold),
        Cell::new("Credential").add_attribute(Attribute::Bold),
    ]);
    for (name, entry) in &record.services {
        let credential = if entry.credential.starts_with("default login") {
            Cell::new(&entry.credential).fg(Color::Yellow)
        } else {
            Cell::new(&entry.credential)
        };
        table.add_row(vec![Cell::new(name), Cell::new(&entry.endpoint), credential]);
    }
    table
}

/// Operator follow-ups after a run.
pub fn next_steps(record: &InventoryRecord) -> Vec<String> {
    let mut steps = vec![format!(
        "Issue TLS certificates in the proxy admin UI at http://{}:{}",
        record.host,
        constants::PORT_PROXY_ADMIN
    )];
    for (name, entry) in &record.services {
        if entry.credential.starts_with("default login") {
            steps.push(format!("Rotate the default password of {} ({})", name, entry.endpoint));
        }
    }
    steps.push(format!(
        "Secret values are in {}; read one with `hostforge secret get <name> --confirm --reason <text>`",
        record.secrets_file
    ));
    steps.push("Verify backups with `hostforge backup snapshots`".to_string());
    steps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::catalogue;
    use chrono::TimeZone;
    use std::path::PathBuf;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap()
    }

    fn record(skip_monitoring: bool, panel: bool) -> InventoryRecord {
        render(
            "box.example.org",
            &catalogue::selected(skip_monitoring),
            panel,
            &PathBuf::from("/etc/hostforge/secrets.toml"),
            now(),
        )
    }

    #[test]
    fn test_render_endpoints_and_references() {
        let rec = record(false, false);
        assert_eq!(rec.services.len(), 6);
        assert_eq!(
            rec.services["portainer"].endpoint,
            "https://box.example.org:9443"
        );
        assert_eq!(
            rec.services["postgres"].endpoint,
            "postgres:5432 (platform network only)"
        );
        assert_eq!(rec.services["grafana"].credential, "secret:grafana_admin_password");
        assert_eq!(rec.services["portainer"].credential, "set on first login");
        assert!(rec.services["nginx-proxy-manager"]
            .credential
            .starts_with("default login"));
        assert!(!rec.services.contains_key("admin-panel"));
    }

    #[test]
    fn test_skip_monitoring_and_panel() {
        let rec = record(true, true);
        assert!(!rec.services.contains_key("grafana"));
        assert!(!rec.services.contains_key("prometheus"));
        assert_eq!(rec.services["admin-panel"].endpoint, "https://box.example.org:9200");
    }

    #[test]
    fn test_render_is_pure() {
        assert_eq!(record(false, true), record(false, true));
    }

    #[test]
    fn test_write_owner_only() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("inventory.toml");
        write(&path, &record(false, false)).unwrap();
        let loaded: InventoryRecord = store::load(&path).unwrap().unwrap();
        assert_eq!(loaded, record(false, false));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn test_next_steps() {
        let steps = next_steps(&record(false, false));
        assert!(steps[0].contains("http://box.example.org:81"));
        assert!(steps.iter().any(|s| s.contains("Rotate the default password of nginx-proxy-manager")));
        assert!(steps.last().unwrap().contains("backup snapshots"));
    }

    #[test]
    fn test_summary_table_lists_services() {
        let table = summary_table(&record(true, false)).to_string();
        assert!(table.contains("code-server"));
        assert!(table.contains("secret:code_server_password"));
        assert!(!table.contains("grafana"));
    }
}
