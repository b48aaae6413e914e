//! Converge one request: validate, then plan and execute each step in
//! order on a single connection inside the caller's transaction.

use crate::attributes::Capabilities;
use crate::config::{MembershipRequest, Request, State, UserRequest, ValidatedUser};
use crate::directory::{Catalog, PUBLIC_ROLE};
use crate::error::ReconcileError;
use crate::planner::{
    check_mutable, membership_pairs, plan_grant, plan_membership, plan_revoke, plan_role,
    resolve_roles, retain_existing,
};
use crate::sql::{ExecError, Session, Statement};
use anyhow::Context;
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::BTreeMap;

const DROP_SAVEPOINT: &str = "pgrole_drop_role";

/// Progress of one request.
///
/// `Validating -> Planning -> Executing -> {Committed | RolledBack | Failed}`,
/// `Failed` being reachable from every non-terminal phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Validating,
    Planning,
    Executing,
    Committed,
    RolledBack,
    Failed,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Committed | Phase::RolledBack | Phase::Failed)
    }
}

/// What a request did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Outcome {
    pub changed: bool,
    /// executed statements, passwords masked
    pub queries: Vec<String>,
    /// group -> members it was granted to
    pub granted: BTreeMap<String, Vec<String>>,
    /// group -> members it was revoked from
    pub revoked: BTreeMap<String, Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role_removed: Option<bool>,
    pub warnings: Vec<String>,
    pub groups: Vec<String>,
    pub target_roles: Vec<String>,
}

/// Runs requests against a connection that already has a transaction
/// open. [Reconciler::reconcile] never commits nor rolls back, see
/// [Reconciler::complete].
pub struct Reconciler<'a, C> {
    conn: &'a mut C,
    capabilities: Capabilities,
    phase: Phase,
    outcome: Outcome,
}

impl<'a, C: Catalog + Session> Reconciler<'a, C> {
    pub fn new(conn: &'a mut C) -> Self {
        let capabilities = Capabilities::new(conn.server_version());

        Self {
            conn,
            capabilities,
            phase: Phase::Validating,
            outcome: Outcome::default(),
        }
    }

    /// Terminal only once [Reconciler::complete] has ended the transaction.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Statements run so far, also available after a failure.
    pub fn outcome(&self) -> &Outcome {
        &self.outcome
    }

    pub fn reconcile(&mut self, request: &Request) -> Result<Outcome, ReconcileError> {
        self.phase = Phase::Validating;
        self.outcome = Outcome::default();
        debug!("reconciling {}", request);

        let result = match request {
            Request::User(user) => self.reconcile_user(user),
            Request::Membership(membership) => self.reconcile_membership(membership),
        };

        match result {
            Ok(()) => Ok(self.outcome.clone()),
            Err(e) => {
                self.phase = Phase::Failed;
                Err(e)
            }
        }
    }

    /// End the transaction with [finish] and move to its terminal phase.
    pub fn complete(
        &mut self,
        result: &Result<Outcome, ReconcileError>,
        check_mode: bool,
    ) -> anyhow::Result<Phase> {
        match finish(&mut *self.conn, result, check_mode) {
            Ok(phase) => {
                self.phase = phase;
                Ok(phase)
            }
            Err(e) => {
                self.phase = Phase::Failed;
                Err(e)
            }
        }
    }

    fn reconcile_user(&mut self, request: &UserRequest) -> Result<(), ReconcileError> {
        let user = request.validate(&self.capabilities)?;
        check_mutable(&user.name, &user.attributes)?;

        self.phase = Phase::Planning;
        match request.state {
            State::Present => self.ensure_user(&user, request),
            State::Absent => self.remove_user(&user, request.fail_on_user),
        }
    }

    fn ensure_user(&mut self, user: &ValidatedUser, request: &UserRequest) -> Result<(), ReconcileError> {
        let name = user.name.as_str();

        // Groups are checked before the first statement runs
        let mut warnings = vec![];
        let groups = retain_existing(
            &mut *self.conn,
            &user.groups,
            request.fail_on_user,
            &mut warnings,
        )?;
        let pairs = membership_pairs(
            &groups,
            &[name.to_string()],
            request.fail_on_user,
            &mut warnings,
        )?;
        self.outcome.warnings.extend(warnings);
        self.outcome.target_roles = vec![name.to_string()];
        for group in &groups {
            self.outcome.granted.entry(group.clone()).or_default();
        }
        self.outcome.groups = groups;

        let statement = plan_role(
            &mut *self.conn,
            name,
            &user.attributes,
            request.no_password_changes,
        )?;
        if let Some(statement) = statement {
            self.execute(&statement)?;
        }

        for (object, privileges) in &user.privileges {
            if let Some(statement) = plan_grant(&mut *self.conn, name, object, privileges)? {
                self.execute(&statement)?;
            }
        }

        for (group, member) in &pairs {
            if let Some(statement) = plan_membership(&mut *self.conn, group, member, true)? {
                self.execute(&statement)?;
                self.record_membership(group, member, true);
            }
        }

        Ok(())
    }

    fn remove_user(&mut self, user: &ValidatedUser, fail_on_user: bool) -> Result<(), ReconcileError> {
        let name = user.name.as_str();
        self.outcome.target_roles = vec![name.to_string()];
        if !self.conn.role_exists(name)? {
            debug!("role {} does not exist, nothing to remove", name);
            self.outcome.role_removed = Some(false);
            return Ok(());
        }

        for (object, privileges) in &user.privileges {
            if let Some(statement) = plan_revoke(&mut *self.conn, name, object, privileges)? {
                self.execute(&statement)?;
            }
        }

        // PUBLIC only loses privileges, it cannot be dropped
        if name == PUBLIC_ROLE {
            self.outcome.role_removed = Some(false);
            return Ok(());
        }

        let removed = self.drop_role(name, fail_on_user)?;
        self.outcome.role_removed = Some(removed);

        Ok(())
    }

    /// DROP inside a savepoint, so that a failure leaves the revokes
    /// above in place.
    fn drop_role(&mut self, role: &str, fail_on_user: bool) -> Result<bool, ReconcileError> {
        let statement = Statement::DropRole {
            role: role.to_string(),
        };
        let text = statement.redacted();
        self.phase = Phase::Executing;

        self.conn
            .savepoint(DROP_SAVEPOINT)
            .map_err(|e| exec_error(&format!("SAVEPOINT {}", DROP_SAVEPOINT), e))?;

        match self.conn.execute(&statement) {
            Ok(()) => {
                self.conn
                    .release_savepoint(DROP_SAVEPOINT)
                    .map_err(|e| exec_error(&format!("RELEASE SAVEPOINT {}", DROP_SAVEPOINT), e))?;
                self.record(text);
                Ok(true)
            }
            Err(ExecError::ReadOnly(message)) => Err(ReconcileError::ReadOnlyTransaction {
                statement: text,
                message,
            }),
            Err(ExecError::Failed(message)) => {
                self.conn.rollback_to_savepoint(DROP_SAVEPOINT).map_err(|e| {
                    exec_error(&format!("ROLLBACK TO SAVEPOINT {}", DROP_SAVEPOINT), e)
                })?;

                if fail_on_user {
                    return Err(ReconcileError::RoleRemoval {
                        role: role.to_string(),
                        message,
                    });
                }

                let warning = format!("Unable to remove user {}: {}", role, message);
                warn!("{}", warning);
                self.outcome.warnings.push(warning);
                Ok(false)
            }
        }
    }

    fn reconcile_membership(&mut self, request: &MembershipRequest) -> Result<(), ReconcileError> {
        let membership = request.validate()?;

        self.phase = Phase::Planning;
        let resolved = resolve_roles(
            &mut *self.conn,
            &membership.groups,
            &membership.target_roles,
            request.fail_on_role,
        )?;

        let present = request.state == State::Present;
        let history = if present {
            &mut self.outcome.granted
        } else {
            &mut self.outcome.revoked
        };
        for group in &resolved.groups {
            history.entry(group.clone()).or_default();
        }
        self.outcome.warnings.extend(resolved.warnings);
        self.outcome.groups = resolved.groups;
        self.outcome.target_roles = resolved.members;

        for (group, member) in &resolved.pairs {
            if let Some(statement) = plan_membership(&mut *self.conn, group, member, present)? {
                self.execute(&statement)?;
                self.record_membership(group, member, present);
            }
        }

        Ok(())
    }

    fn execute(&mut self, statement: &Statement) -> Result<(), ReconcileError> {
        self.phase = Phase::Executing;
        let text = statement.redacted();

        self.conn
            .execute(statement)
            .map_err(|e| exec_error(&text, e))?;
        self.record(text);

        Ok(())
    }

    fn record(&mut self, text: String) {
        info!("{}", text);
        self.outcome.queries.push(text);
        self.outcome.changed = true;
    }

    fn record_membership(&mut self, group: &str, member: &str, granted: bool) {
        let history = if granted {
            &mut self.outcome.granted
        } else {
            &mut self.outcome.revoked
        };
        history
            .entry(group.to_string())
            .or_default()
            .push(member.to_string());
    }
}

fn exec_error(statement: &str, error: ExecError) -> ReconcileError {
    match error {
        ExecError::ReadOnly(message) => ReconcileError::ReadOnlyTransaction {
            statement: statement.to_string(),
            message,
        },
        ExecError::Failed(message) => ReconcileError::Execution {
            statement: statement.to_string(),
            message,
        },
    }
}

/// End the transaction of one request: roll back on error and in check
/// mode, commit only when something changed.
pub fn finish<S: Session>(
    session: &mut S,
    result: &Result<Outcome, ReconcileError>,
    check_mode: bool,
) -> anyhow::Result<Phase> {
    match result {
        Err(e) => {
            session
                .rollback()
                .with_context(|| format!("rollback after failed request: {}", e))?;
            Ok(Phase::Failed)
        }
        Ok(outcome) if outcome.changed && !check_mode => {
            session.commit()?;
            Ok(Phase::Committed)
        }
        Ok(_) => {
            session.rollback()?;
            Ok(Phase::RolledBack)
        }
    }
}
