//! Per-instance DNS registry (spec §4.3).
//!
//! Maintains an in-memory `IP -> hostnames` map, mirrors it to a hosts
//! file under `<workdir>/network/hosts`, and signals a resolver process
//! to reload. The hosts file's parent directory is created up front and
//! the in-memory map stays the source of truth; the file is just a
//! rendering of it.

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use std::net::IpAddr;

use crate::error::{NetCoreError, Result};
use crate::types::HostsTable;

const HOSTS_RELATIVE_PATH: &str = "network/hosts";

/// Collaborator contract for signalling the resolver process (spec §4.3:
/// `CleanCache`/`Restart`). The DNS daemon itself lives outside this
/// crate; this trait is the seam.
pub trait ResolverControl: Send + Sync {
    /// Flushes any cached answers the resolver is holding.
    fn clean_cache(&self);

    /// Tells the resolver to reread its hosts file (e.g. via SIGHUP).
    fn restart(&self);
}

/// [`ResolverControl`] that only logs — suitable for tests and for
/// standalone use of the coordinator without a live resolver attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingResolverControl;

impl ResolverControl for LoggingResolverControl {
    fn clean_cache(&self) {
        tracing::debug!("resolver cache clean requested");
    }

    fn restart(&self) {
        tracing::info!("resolver restart requested");
    }
}

/// In-memory DNS registry backed by a hosts file on disk.
pub struct DnsRegistry {
    working_dir: PathBuf,
    dns_ip: IpAddr,
    hosts: RwLock<HostsTable>,
    resolver: Box<dyn ResolverControl>,
}

impl DnsRegistry {
    /// Creates a new registry. `working_dir` is the base directory; the
    /// hosts file is written to `<working_dir>/network/hosts`.
    ///
    /// # Errors
    ///
    /// Returns [`NetCoreError::StorageFailure`] if the hosts file's
    /// parent directory cannot be created.
    pub fn new(
        working_dir: impl Into<PathBuf>,
        dns_ip: IpAddr,
        resolver: Box<dyn ResolverControl>,
    ) -> Result<Self> {
        let working_dir = working_dir.into();
        let hosts_path = working_dir.join(HOSTS_RELATIVE_PATH);
        if let Some(parent) = hosts_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                NetCoreError::StorageFailure(format!(
                    "failed to create DNS working directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        Ok(Self {
            working_dir,
            dns_ip,
            hosts: RwLock::new(HostsTable::new()),
            resolver,
        })
    }

    /// Returns the resolver IP advertised to every instance (spec §4.4:
    /// invariant 4).
    #[must_use]
    pub const fn dns_ip(&self) -> IpAddr {
        self.dns_ip
    }

    /// Returns the path of the hosts file this registry maintains.
    #[must_use]
    pub fn hosts_file_path(&self) -> PathBuf {
        self.working_dir.join(HOSTS_RELATIVE_PATH)
    }

    /// Overwrites the hostnames registered for `ip`, rewrites the hosts
    /// file, and signals the resolver to reload.
    ///
    /// Hostnames are not validated beyond non-emptiness (spec §4.3).
    ///
    /// # Errors
    ///
    /// Returns [`NetCoreError::StorageFailure`] if the hosts file cannot
    /// be written.
    pub fn add_hosts(&self, hostnames: Vec<String>, ip: IpAddr) -> Result<()> {
        let hostnames: Vec<String> = hostnames.into_iter().filter(|h| !h.is_empty()).collect();

        {
            let mut hosts = self.hosts.write();
            hosts.insert(ip, hostnames);
        }

        self.rewrite_hosts_file()?;
        self.resolver.clean_cache();
        self.resolver.restart();
        tracing::info!(%ip, "registered DNS hosts");
        Ok(())
    }

    /// Drops the entry for `ip`, if any, and rewrites the hosts file.
    ///
    /// # Errors
    ///
    /// Returns [`NetCoreError::StorageFailure`] if the hosts file cannot
    /// be written.
    pub fn remove_ip(&self, ip: IpAddr) -> Result<()> {
        let removed = self.hosts.write().remove(&ip).is_some();
        if removed {
            self.rewrite_hosts_file()?;
            tracing::debug!(%ip, "removed DNS entry");
        }
        Ok(())
    }

    /// Forces a resolver cache flush without changing any records.
    pub fn clean_cache(&self) {
        self.resolver.clean_cache();
    }

    /// Forces a resolver restart without changing any records.
    pub fn restart(&self) {
        self.resolver.restart();
    }

    /// Returns the hostnames currently registered for `ip`, if any.
    #[must_use]
    pub fn lookup(&self, ip: IpAddr) -> Option<Vec<String>> {
        self.hosts.read().get(&ip).cloned()
    }

    /// Returns the number of IPs currently registered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.hosts.read().len()
    }

    /// Returns true if no IPs are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn rewrite_hosts_file(&self) -> Result<()> {
        let path = self.hosts_file_path();
        let hosts = self.hosts.read();

        let mut contents = String::new();
        // Deterministic ordering keeps the artifact diff-friendly across
        // rewrites.
        let mut entries: Vec<_> = hosts.iter().collect();
        entries.sort_by_key(|(ip, _)| *ip);
        for (ip, names) in entries {
            if names.is_empty() {
                continue;
            }
            contents.push_str(&ip.to_string());
            for name in names {
                contents.push('\t');
                contents.push_str(name);
            }
            contents.push('\n');
        }

        let mut file = fs::File::create(&path).map_err(|e| {
            NetCoreError::StorageFailure(format!("failed to write {}: {e}", path.display()))
        })?;
        file.write_all(contents.as_bytes()).map_err(|e| {
            NetCoreError::StorageFailure(format!("failed to write {}: {e}", path.display()))
        })?;
        Ok(())
    }
}

impl std::fmt::Debug for DnsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DnsRegistry")
            .field("working_dir", &self.working_dir)
            .field("dns_ip", &self.dns_ip)
            .field("entries", &self.len())
            .finish()
    }
}

/// Reads the hosts file at `path`, returning one `(IP, hostnames)` pair
/// per non-empty line. Intended for tests and operator inspection.
///
/// # Errors
///
/// Returns [`NetCoreError::StorageFailure`] if the file cannot be read,
/// or [`NetCoreError::InvalidAddress`] if a line's IP column fails to
/// parse.
pub fn read_hosts_file(path: &Path) -> Result<HostsTable> {
    let contents = fs::read_to_string(path)
        .map_err(|e| NetCoreError::StorageFailure(format!("failed to read {}: {e}", path.display())))?;

    let mut table = HostsTable::new();
    for line in contents.lines() {
        let mut parts = line.split_whitespace();
        let Some(ip_str) = parts.next() else {
            continue;
        };
        let ip: IpAddr = ip_str
            .parse()
            .map_err(|_| NetCoreError::InvalidAddress {
                reason: format!("invalid hosts file IP: {ip_str}"),
            })?;
        let names: Vec<String> = parts.map(ToString::to_string).collect();
        table.insert(ip, names);
    }
    Ok(table)
}
