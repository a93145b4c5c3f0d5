//! Persisting root credentials and detecting when they change.

use std::fs::Permissions;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use proven_minio_admin::AdminClient;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::config::{Credentials, RuntimeConfig};
use crate::error::{Error, Result};
use crate::process::ProcessControl;
use crate::supervisor::ProcessSupervisor;

const USER_FILE: &str = ".root_user";
const PASSWORD_FILE: &str = ".root_password";
const OWNER_READ_WRITE: u32 = 0o600;

/// What a rotation attempt decided.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RotationOutcome {
    /// Nothing to migrate; start normally.
    Unchanged,

    /// The server has migrated to the new credentials and the container must be
    /// restarted before it is used.
    RotatedNeedsContainerRestart,
}

#[derive(Debug)]
enum RotationState {
    NoPriorCredentials,
    Unchanged,
    Changed(Credentials),
}

/// Root credentials persisted in a directory with owner-only permissions.
#[derive(Clone, Debug)]
pub struct CredentialStore {
    dir: PathBuf,
}

impl CredentialStore {
    /// Creates a store backed by files in `dir`.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Reads the persisted credentials. Both files must exist.
    ///
    /// # Errors
    ///
    /// Returns an error if a file exists but cannot be read.
    pub async fn load(&self) -> Result<Option<Credentials>> {
        let Some(user) = self.read(USER_FILE).await? else {
            return Ok(None);
        };
        let Some(password) = self.read(PASSWORD_FILE).await? else {
            return Ok(None);
        };

        Ok(Some(Credentials::new(user, password)))
    }

    /// Persists `credentials`, readable and writable by the owner only.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be written.
    pub async fn save(&self, credentials: &Credentials) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Error::Io("failed to create credentials directory", e))?;

        self.write(USER_FILE, &credentials.user).await?;
        self.write(PASSWORD_FILE, &credentials.password).await
    }

    async fn read(&self, name: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.dir.join(name)).await {
            Ok(contents) => Ok(Some(contents.trim_end_matches(['\r', '\n']).to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Io("failed to read persisted credentials", e)),
        }
    }

    async fn write(&self, name: &str, contents: &str) -> Result<()> {
        let path = self.dir.join(name);

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .mode(OWNER_READ_WRITE)
            .open(&path)
            .await
            .map_err(|e| Error::Io("failed to open credentials file", e))?;

        // mode() only applies to newly created files
        fs::set_permissions(&path, Permissions::from_mode(OWNER_READ_WRITE))
            .await
            .map_err(|e| Error::Io("failed to restrict credentials file", e))?;

        file.write_all(contents.as_bytes())
            .await
            .map_err(|e| Error::Io("failed to write credentials file", e))?;
        file.flush()
            .await
            .map_err(|e| Error::Io("failed to write credentials file", e))
    }
}

/// Detects root credential changes and migrates the server to the new ones.
pub struct CredentialRotator<'a, P, A>
where
    P: ProcessControl,
    A: AdminClient,
{
    config: &'a RuntimeConfig,
    store: CredentialStore,
    supervisor: &'a ProcessSupervisor<P, A>,
}

impl<'a, P, A> CredentialRotator<'a, P, A>
where
    P: ProcessControl,
    A: AdminClient,
{
    /// Creates a rotator persisting credentials in the data directory.
    pub fn new(config: &'a RuntimeConfig, supervisor: &'a ProcessSupervisor<P, A>) -> Self {
        Self {
            config,
            store: CredentialStore::new(config.data_dir()),
            supervisor,
        }
    }

    /// Uses `store` instead of the data directory.
    #[must_use]
    pub fn with_store(mut self, store: CredentialStore) -> Self {
        self.store = store;
        self
    }

    /// Compares the configured credentials with the persisted ones.
    ///
    /// When rotation is enabled and they differ, any running server is stopped first.
    /// The server is then started once with both pairs so it can migrate, stopped again,
    /// and the new pair is persisted whether or not that start succeeded.
    ///
    /// # Errors
    ///
    /// Returns `Error::AlreadyRunning` without touching the persisted pair if a running
    /// server cannot be stopped. Otherwise returns an error if the credential files cannot
    /// be accessed or the migration start fails.
    pub async fn rotate(&self) -> Result<RotationOutcome> {
        let Some(current) = self.config.credentials() else {
            debug!("no root credentials configured, nothing to rotate");
            return Ok(RotationOutcome::Unchanged);
        };

        match self.state(current).await? {
            RotationState::NoPriorCredentials => {
                debug!("persisting root credentials");
                self.store.save(current).await?;
                Ok(RotationOutcome::Unchanged)
            }
            RotationState::Unchanged => {
                debug!("root credentials unchanged");
                self.store.save(current).await?;
                Ok(RotationOutcome::Unchanged)
            }
            RotationState::Changed(previous) => {
                info!("root credentials changed, migrating minio to the new credentials");

                // a running server never sees the previous pair
                self.supervisor.stop().await;
                if self.supervisor.is_running().await {
                    return Err(Error::AlreadyRunning);
                }

                let migrated = self
                    .supervisor
                    .start_with_previous_credentials(&previous)
                    .await;
                if migrated.is_ok() {
                    self.supervisor.stop().await;
                }

                self.store.save(current).await?;
                migrated?;

                warn!("root credentials rotated, the container must be restarted");
                Ok(RotationOutcome::RotatedNeedsContainerRestart)
            }
        }
    }

    async fn state(&self, current: &Credentials) -> Result<RotationState> {
        if !self.config.force_new_keys().is_yes() {
            return Ok(RotationState::NoPriorCredentials);
        }

        Ok(match self.store.load().await? {
            None => RotationState::NoPriorCredentials,
            Some(previous) if &previous == current => RotationState::Unchanged,
            Some(previous) => RotationState::Changed(previous),
        })
    }
}
