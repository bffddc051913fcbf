use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use super::store::{CacheKey, DashboardStore};
use crate::error::DashboardError;
use crate::gateway::DashboardApi;
use crate::models::{
    AccountCreate, AccountUpdate, LinkedAccount, LoginTestResult, Profile, ProfileCreate,
    ProfileUpdate, ResourceId,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MutationKind {
    CreateProfile,
    UpdateProfile,
    DeleteProfile,
    ForceCheck,
    CreateAccount,
    UpdateAccount,
    DeleteAccount,
    TestAccountLogin,
}

impl MutationKind {
    /// Caches whose contents change when this mutation succeeds.
    pub fn invalidates(self) -> &'static [CacheKey] {
        match self {
            MutationKind::CreateProfile
            | MutationKind::UpdateProfile
            | MutationKind::DeleteProfile => &[CacheKey::Profiles, CacheKey::Stats],
            MutationKind::CreateAccount
            | MutationKind::UpdateAccount
            | MutationKind::DeleteAccount
            | MutationKind::TestAccountLogin => &[CacheKey::Accounts],
            MutationKind::ForceCheck => &[],
        }
    }

    pub fn is_create(self) -> bool {
        matches!(self, MutationKind::CreateProfile | MutationKind::CreateAccount)
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MutationKind::CreateProfile => "create_profile",
            MutationKind::UpdateProfile => "update_profile",
            MutationKind::DeleteProfile => "delete_profile",
            MutationKind::ForceCheck => "force_check",
            MutationKind::CreateAccount => "create_account",
            MutationKind::UpdateAccount => "update_account",
            MutationKind::DeleteAccount => "delete_account",
            MutationKind::TestAccountLogin => "test_account_login",
        };
        f.write_str(name)
    }
}

/// One action trigger. The "delete" button of profile 7 and that of profile 8
/// are different actions; the "add profile" button has no target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ActionKey {
    pub kind: MutationKind,
    pub target: Option<ResourceId>,
}

impl ActionKey {
    pub fn new(kind: MutationKind, target: Option<ResourceId>) -> Self {
        Self { kind, target }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Mutation {
    CreateProfile(ProfileCreate),
    UpdateProfile {
        id: ResourceId,
        update: ProfileUpdate,
    },
    DeleteProfile(ResourceId),
    ForceCheck(ResourceId),
    CreateAccount(AccountCreate),
    UpdateAccount {
        id: ResourceId,
        update: AccountUpdate,
    },
    DeleteAccount(ResourceId),
    TestAccountLogin {
        id: ResourceId,
        password: String,
    },
}

impl Mutation {
    pub fn kind(&self) -> MutationKind {
        match self {
            Mutation::CreateProfile(_) => MutationKind::CreateProfile,
            Mutation::UpdateProfile { .. } => MutationKind::UpdateProfile,
            Mutation::DeleteProfile(_) => MutationKind::DeleteProfile,
            Mutation::ForceCheck(_) => MutationKind::ForceCheck,
            Mutation::CreateAccount(_) => MutationKind::CreateAccount,
            Mutation::UpdateAccount { .. } => MutationKind::UpdateAccount,
            Mutation::DeleteAccount(_) => MutationKind::DeleteAccount,
            Mutation::TestAccountLogin { .. } => MutationKind::TestAccountLogin,
        }
    }

    pub fn target(&self) -> Option<ResourceId> {
        match self {
            Mutation::CreateProfile(_) | Mutation::CreateAccount(_) => None,
            Mutation::UpdateProfile { id, .. }
            | Mutation::UpdateAccount { id, .. }
            | Mutation::TestAccountLogin { id, .. } => Some(*id),
            Mutation::DeleteProfile(id) | Mutation::ForceCheck(id) | Mutation::DeleteAccount(id) => {
                Some(*id)
            }
        }
    }

    pub fn key(&self) -> ActionKey {
        ActionKey::new(self.kind(), self.target())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum MutationOutcome {
    Profile(Profile),
    Account(LinkedAccount),
    LoginTest(LoginTestResult),
    Done,
}

#[derive(Clone, Debug, PartialEq)]
pub enum MutationStatus {
    Idle,
    Pending,
    Succeeded,
    Failed(DashboardError),
}

impl MutationStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, MutationStatus::Pending)
    }
}

/// Writes through the gateway and invalidates the owning caches afterwards.
///
/// At most one request per `ActionKey` is in flight. A second submit for the
/// same action while the first is pending is refused with `Conflict` and
/// never reaches the backend.
pub struct MutationCoordinator {
    api: Arc<dyn DashboardApi>,
    store: DashboardStore,
    statuses: Mutex<HashMap<ActionKey, MutationStatus>>,
    profile_form: Mutex<ProfileCreate>,
    account_form: Mutex<AccountCreate>,
}

/// Releases the pending slot if the submitting future is dropped before the
/// response arrives.
struct PendingSlot<'a> {
    coordinator: &'a MutationCoordinator,
    key: ActionKey,
    settled: bool,
}

impl PendingSlot<'_> {
    fn settle(mut self, status: MutationStatus) {
        self.coordinator.set_status(self.key, status);
        self.settled = true;
    }
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        if !self.settled {
            debug!(action = %self.key.kind, target = ?self.key.target, "Mutation abandoned before completion.");
            self.coordinator.set_status(self.key, MutationStatus::Idle);
        }
    }
}

impl MutationCoordinator {
    pub fn new(api: Arc<dyn DashboardApi>, store: DashboardStore) -> Self {
        Self {
            api,
            store,
            statuses: Mutex::new(HashMap::new()),
            profile_form: Mutex::new(ProfileCreate::default()),
            account_form: Mutex::new(AccountCreate::default()),
        }
    }

    pub fn store(&self) -> &DashboardStore {
        &self.store
    }

    pub fn status(&self, key: ActionKey) -> MutationStatus {
        self.statuses
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .unwrap_or(MutationStatus::Idle)
    }

    pub fn is_pending(&self, key: ActionKey) -> bool {
        self.status(key).is_pending()
    }

    fn set_status(&self, key: ActionKey, status: MutationStatus) {
        self.statuses.lock().unwrap().insert(key, status);
    }

    fn claim(&self, key: ActionKey) -> Result<PendingSlot<'_>, DashboardError> {
        let mut statuses = self.statuses.lock().unwrap();
        if statuses.get(&key).is_some_and(MutationStatus::is_pending) {
            warn!(action = %key.kind, target = ?key.target, "Rejected duplicate submit while pending.");
            return Err(DashboardError::Conflict(format!(
                "{} is already in progress",
                key.kind
            )));
        }
        statuses.insert(key, MutationStatus::Pending);
        Ok(PendingSlot {
            coordinator: self,
            key,
            settled: false,
        })
    }

    pub async fn submit(&self, mutation: Mutation) -> Result<MutationOutcome, DashboardError> {
        let kind = mutation.kind();
        let slot = self.claim(mutation.key())?;
        debug!(action = %kind, target = ?mutation.target(), "Submitting mutation.");

        match self.dispatch(mutation).await {
            Ok(outcome) => {
                for key in kind.invalidates() {
                    self.store.invalidate(*key);
                }
                if kind.is_create() {
                    self.reset_form(kind);
                }
                info!(action = %kind, "Mutation succeeded.");
                slot.settle(MutationStatus::Succeeded);
                Ok(outcome)
            }
            Err(err) => {
                warn!(action = %kind, error = %err, "Mutation failed.");
                slot.settle(MutationStatus::Failed(err.clone()));
                Err(err)
            }
        }
    }

    async fn dispatch(&self, mutation: Mutation) -> Result<MutationOutcome, DashboardError> {
        let api = &self.api;
        let outcome = match mutation {
            Mutation::CreateProfile(payload) => {
                MutationOutcome::Profile(api.create_profile(&payload).await?)
            }
            Mutation::UpdateProfile { id, update } => {
                MutationOutcome::Profile(api.update_profile(id, &update).await?)
            }
            Mutation::DeleteProfile(id) => {
                api.delete_profile(id).await?;
                MutationOutcome::Done
            }
            Mutation::ForceCheck(id) => {
                api.force_check(id).await?;
                MutationOutcome::Done
            }
            Mutation::CreateAccount(payload) => {
                MutationOutcome::Account(api.create_account(&payload).await?)
            }
            Mutation::UpdateAccount { id, update } => {
                MutationOutcome::Account(api.update_account(id, &update).await?)
            }
            Mutation::DeleteAccount(id) => {
                api.delete_account(id).await?;
                MutationOutcome::Done
            }
            Mutation::TestAccountLogin { id, password } => {
                MutationOutcome::LoginTest(api.test_account_login(id, &password).await?)
            }
        };
        Ok(outcome)
    }

    fn reset_form(&self, kind: MutationKind) {
        match kind {
            MutationKind::CreateProfile => {
                *self.profile_form.lock().unwrap() = ProfileCreate::default();
            }
            MutationKind::CreateAccount => {
                *self.account_form.lock().unwrap() = AccountCreate::default();
            }
            _ => {}
        }
    }

    pub fn profile_form(&self) -> ProfileCreate {
        self.profile_form.lock().unwrap().clone()
    }

    pub fn edit_profile_form<F: FnOnce(&mut ProfileCreate)>(&self, edit: F) {
        edit(&mut self.profile_form.lock().unwrap());
    }

    pub fn account_form(&self) -> AccountCreate {
        self.account_form.lock().unwrap().clone()
    }

    pub fn edit_account_form<F: FnOnce(&mut AccountCreate)>(&self, edit: F) {
        edit(&mut self.account_form.lock().unwrap());
    }

    /// Submits the current profile draft. The draft is reset only on success.
    pub async fn submit_profile_form(&self) -> Result<MutationOutcome, DashboardError> {
        let draft = self.profile_form();
        if draft.username.trim().is_empty() || draft.webhook_url.trim().is_empty() {
            return Err(DashboardError::Validation {
                status: 0,
                detail: "Username and webhook URL are required".to_string(),
            });
        }
        self.submit(Mutation::CreateProfile(draft)).await
    }

    pub async fn submit_account_form(&self) -> Result<MutationOutcome, DashboardError> {
        let draft = self.account_form();
        if !draft.is_complete() {
            return Err(DashboardError::Validation {
                status: 0,
                detail: "Username and password are required".to_string(),
            });
        }
        self.submit(Mutation::CreateAccount(draft)).await
    }
}
