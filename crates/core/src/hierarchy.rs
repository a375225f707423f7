use std::collections::{HashMap, HashSet};

use crate::domain::user::User;
use crate::domain::{CompanyId, UserId};
use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Node {
    company_id: CompanyId,
    manager_id: Option<UserId>,
}

/// Parent-pointer view of one company's reporting lines.
#[derive(Clone, Debug, Default)]
pub struct ManagerGraph {
    nodes: HashMap<UserId, Node>,
}

impl ManagerGraph {
    pub fn new<'a>(users: impl IntoIterator<Item = &'a User>) -> Self {
        let nodes = users
            .into_iter()
            .map(|user| {
                (user.id, Node { company_id: user.company_id, manager_id: user.manager_id })
            })
            .collect();
        Self { nodes }
    }

    pub fn manager_of(&self, user_id: UserId) -> Option<UserId> {
        self.nodes.get(&user_id).and_then(|node| node.manager_id)
    }

    /// Managers above `user_id`, nearest first. Stops on a repeated node so that
    /// legacy data with a loop cannot hang the walk.
    pub fn manager_chain(&self, user_id: UserId) -> Vec<UserId> {
        let mut chain = Vec::new();
        let mut visited = HashSet::from([user_id]);
        let mut current = user_id;

        while let Some(manager_id) = self.manager_of(current) {
            if !visited.insert(manager_id) {
                break;
            }
            chain.push(manager_id);
            current = manager_id;
        }

        chain
    }

    /// Checks a prospective `manager_id` edge for `user_id` (None for a user that
    /// does not exist yet) in `company_id`.
    pub fn validate_assignment(
        &self,
        user_id: Option<UserId>,
        company_id: CompanyId,
        manager_id: UserId,
    ) -> Result<(), DomainError> {
        let Some(manager) = self.nodes.get(&manager_id) else {
            return Err(DomainError::ConstraintViolation(format!(
                "manager {manager_id} does not exist"
            )));
        };

        if manager.company_id != company_id {
            return Err(DomainError::ConstraintViolation(format!(
                "manager {manager_id} belongs to a different company"
            )));
        }

        let Some(user_id) = user_id else {
            return Ok(());
        };

        if user_id == manager_id || self.manager_chain(manager_id).contains(&user_id) {
            return Err(DomainError::ManagerCycle { user_id, manager_id });
        }

        Ok(())
    }
}
