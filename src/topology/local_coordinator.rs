//! In-process role coordination.
//!
//! [`ElectionState`] holds who leads each scope and every member's listeners.
//! A [`LocalRoleCoordinator`] is one member's view of that state. Sharing one
//! `ElectionState` between several coordinators simulates a cluster inside a
//! single process; [`LocalRoleCoordinator::single_node`] gives a standalone
//! deployment where the only member wins every scope it registers for.
//!
//! Decisions for a scope are serialized by a per-scope lock that is held while
//! listeners apply the transition. A leadership change first demotes the old
//! leader and waits for it to finish, then promotes the new one.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::metrics;
use super::role::{ListenerRegistration, Role, RoleChangeListener, RoleCoordinator, ScopeKey};
use crate::types::MemberId;

type ListenerList = Vec<(u64, Arc<dyn RoleChangeListener>)>;

/// Election outcomes and listeners shared by all members of a simulated cluster.
#[derive(Default)]
pub struct ElectionState {
    leaders: DashMap<ScopeKey, MemberId>,
    listeners: DashMap<(MemberId, ScopeKey), ListenerList>,
    delivered: DashMap<(MemberId, ScopeKey), Role>,
    locks: DashMap<ScopeKey, Arc<Mutex<()>>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for ElectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElectionState")
            .field("scopes_led", &self.leaders.len())
            .field("registrations", &self.listeners.len())
            .finish()
    }
}

impl ElectionState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Current leader of a scope.
    pub fn leader(&self, scope: &ScopeKey) -> Option<MemberId> {
        self.leaders.get(scope).map(|entry| entry.value().clone())
    }

    /// Make `member` the leader of `scope`.
    ///
    /// The previous leader is demoted and has finished applying the demotion
    /// before `member` is promoted. Other registered members are told they follow.
    pub async fn elect(&self, scope: &ScopeKey, member: &MemberId) {
        let lock = self.scope_lock(scope);
        let _guard = lock.lock().await;

        let previous = self.leader(scope);
        if previous.as_ref() == Some(member) {
            return;
        }

        if let Some(previous) = &previous {
            self.leaders.remove(scope);
            self.deliver(previous, scope, Role::Follower).await;
        }
        for other in self.registered_members(scope) {
            if &other != member && Some(&other) != previous.as_ref() {
                self.deliver(&other, scope, Role::Follower).await;
            }
        }

        self.leaders.insert(scope.clone(), member.clone());
        metrics::record_election();
        info!(scope = %scope, member = %member, previous = ?previous, "Leader elected");
        self.deliver(member, scope, Role::Leader).await;
    }

    /// Remove the leader of `scope` without electing another.
    pub async fn step_down(&self, scope: &ScopeKey) {
        let lock = self.scope_lock(scope);
        let _guard = lock.lock().await;

        if let Some((_, previous)) = self.leaders.remove(scope) {
            info!(scope = %scope, member = %previous, "Leader stepped down");
            self.deliver(&previous, scope, Role::Follower).await;
        }
    }

    fn scope_lock(&self, scope: &ScopeKey) -> Arc<Mutex<()>> {
        self.locks.entry(scope.clone()).or_default().clone()
    }

    /// Drop the lock of an idle scope unless another task still holds a clone.
    fn release_lock(&self, scope: &ScopeKey, held: &Arc<Mutex<()>>) {
        self.locks.remove_if(scope, |_, lock| {
            Arc::ptr_eq(lock, held) && Arc::strong_count(lock) == 2
        });
    }

    fn role_of(&self, member: &MemberId, scope: &ScopeKey) -> Role {
        match self.leaders.get(scope) {
            Some(leader) if leader.value() == member => Role::Leader,
            Some(_) => Role::Follower,
            None => Role::Candidate,
        }
    }

    fn registered_members(&self, scope: &ScopeKey) -> Vec<MemberId> {
        let members: HashSet<MemberId> = self
            .listeners
            .iter()
            .filter(|entry| &entry.key().1 == scope && !entry.value().is_empty())
            .map(|entry| entry.key().0.clone())
            .collect();
        let mut members: Vec<_> = members.into_iter().collect();
        members.sort();
        members
    }

    /// Deliver `role` to every listener `member` has on `scope`, unless that
    /// member has already been told.
    async fn deliver(&self, member: &MemberId, scope: &ScopeKey, role: Role) {
        let key = (member.clone(), scope.clone());
        if self.delivered.get(&key).map(|r| *r.value()) == Some(role) {
            return;
        }
        self.delivered.insert(key.clone(), role);

        let listeners: Vec<Arc<dyn RoleChangeListener>> = self
            .listeners
            .get(&key)
            .map(|entry| entry.value().iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default();

        debug!(scope = %scope, member = %member, role = %role, listeners = listeners.len(), "Delivering role change");
        for listener in listeners {
            listener.role_changed(scope, role).await;
        }
    }
}

/// One member's coordinator.
#[derive(Debug, Clone)]
pub struct LocalRoleCoordinator {
    member: MemberId,
    state: Arc<ElectionState>,
    auto_elect: bool,
}

impl LocalRoleCoordinator {
    /// A member of a (simulated) cluster; elections happen through [`ElectionState`].
    pub fn new(member: MemberId, state: Arc<ElectionState>) -> Self {
        Self {
            member,
            state,
            auto_elect: false,
        }
    }

    /// A standalone member that becomes leader of every scope it registers for.
    pub fn single_node(member: MemberId) -> Self {
        Self {
            member,
            state: ElectionState::new(),
            auto_elect: true,
        }
    }

    pub fn member(&self) -> &MemberId {
        &self.member
    }

    pub fn state(&self) -> &Arc<ElectionState> {
        &self.state
    }

    /// Elect this member for `scope`.
    pub async fn acquire(&self, scope: &ScopeKey) {
        self.state.elect(scope, &self.member).await;
    }
}

#[async_trait]
impl RoleCoordinator for LocalRoleCoordinator {
    async fn register(
        &self,
        scope: ScopeKey,
        listener: Arc<dyn RoleChangeListener>,
    ) -> ListenerRegistration {
        let state = &self.state;
        let lock = state.scope_lock(&scope);
        let _guard = lock.lock().await;

        let id = state.next_id.fetch_add(1, Ordering::Relaxed);
        let key = (self.member.clone(), scope.clone());
        state
            .listeners
            .entry(key.clone())
            .or_default()
            .push((id, Arc::clone(&listener)));

        if self.auto_elect && state.leader(&scope).is_none() {
            state.leaders.insert(scope.clone(), self.member.clone());
            metrics::record_election();
        }

        let role = state.role_of(&self.member, &scope);
        if role != Role::Candidate {
            state.delivered.insert(key, role);
            listener.role_changed(&scope, role).await;
        }

        ListenerRegistration { scope, id }
    }

    async fn deregister(&self, registration: &ListenerRegistration) {
        let state = &self.state;
        let lock = state.scope_lock(&registration.scope);
        let _guard = lock.lock().await;

        let key = (self.member.clone(), registration.scope.clone());
        let now_empty = match state.listeners.get_mut(&key) {
            Some(mut entry) => {
                entry.value_mut().retain(|(id, _)| *id != registration.id);
                entry.value().is_empty()
            }
            None => false,
        };
        if now_empty {
            state.listeners.remove(&key);
            state.delivered.remove(&key);
            if state.leader(&registration.scope).as_ref() == Some(&self.member) {
                state.leaders.remove(&registration.scope);
                debug!(scope = %registration.scope, member = %self.member, "Leader deregistered, scope released");
            }
            if state.leader(&registration.scope).is_none()
                && state.registered_members(&registration.scope).is_empty()
            {
                state.release_lock(&registration.scope, &lock);
            }
        }
    }

    fn current_role(&self, scope: &ScopeKey) -> Role {
        self.state.role_of(&self.member, scope)
    }
}
