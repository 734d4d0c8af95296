//! Role set and the flags derived from it
//!
//! Flags are computed from the set on every call so they can never drift
//! from the assignments they describe.

use crate::model::{Role, RoleAssignment};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// The roles held by the current identity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleSet(BTreeSet<Role>);

impl RoleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep only the assignments bound to `identity_id`
    pub fn from_assignments<'a, I>(identity_id: &str, assignments: I) -> Self
    where
        I: IntoIterator<Item = &'a RoleAssignment>,
    {
        assignments
            .into_iter()
            .filter(|assignment| assignment.identity_id == identity_id)
            .map(|assignment| assignment.role)
            .collect()
    }

    /// Literal membership, ignoring the hierarchy
    pub fn has_role(&self, role: Role) -> bool {
        self.0.contains(&role)
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(Role::Admin)
    }

    pub fn is_project_manager(&self) -> bool {
        self.has_role(Role::ProjectManager) || self.is_admin()
    }

    pub fn is_team_lead(&self) -> bool {
        self.has_role(Role::TeamLead) || self.is_project_manager()
    }

    /// Whether the set grants the privileges of `role` through the hierarchy.
    ///
    /// Every authenticated identity counts as a plain `user`.
    pub fn satisfies(&self, role: Role) -> bool {
        role == Role::User || self.iter().any(|held| held.subsumes(role))
    }

    /// Highest role held, if any
    pub fn highest(&self) -> Option<Role> {
        self.0.iter().next_back().copied()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = Role> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<Role> for RoleSet {
    fn from_iter<T: IntoIterator<Item = Role>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl std::fmt::Display for RoleSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.0.iter().map(Role::as_str).collect();
        write!(f, "[{}]", names.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_role_sets() -> Vec<RoleSet> {
        (0u8..16)
            .map(|mask| {
                Role::ALL
                    .iter()
                    .enumerate()
                    .filter(|(bit, _)| mask & (1 << bit) != 0)
                    .map(|(_, role)| *role)
                    .collect()
            })
            .collect()
    }

    #[test]
    fn test_flags_are_monotone_for_every_set() {
        for roles in all_role_sets() {
            if roles.is_admin() {
                assert!(roles.is_project_manager(), "{roles}");
            }
            if roles.is_project_manager() {
                assert!(roles.is_team_lead(), "{roles}");
            }

            assert_eq!(roles.satisfies(Role::Admin), roles.is_admin(), "{roles}");
            assert_eq!(
                roles.satisfies(Role::ProjectManager),
                roles.is_project_manager(),
                "{roles}"
            );
            assert_eq!(roles.satisfies(Role::TeamLead), roles.is_team_lead(), "{roles}");
            assert!(roles.satisfies(Role::User));
        }
    }

    #[test]
    fn test_has_role_is_literal_membership() {
        for roles in all_role_sets() {
            for role in Role::ALL {
                assert_eq!(roles.has_role(role), roles.iter().any(|r| r == role));
            }
        }

        let admin_only: RoleSet = [Role::Admin].into_iter().collect();
        assert!(!admin_only.has_role(Role::TeamLead));
        assert!(admin_only.is_team_lead());
    }

    #[test]
    fn test_team_lead_only() {
        let roles: RoleSet = [Role::TeamLead].into_iter().collect();
        assert!(roles.is_team_lead());
        assert!(!roles.is_project_manager());
        assert!(!roles.is_admin());
    }

    #[test]
    fn test_admin_implies_everything() {
        let roles: RoleSet = [Role::Admin].into_iter().collect();
        assert!(roles.is_admin());
        assert!(roles.is_project_manager());
        assert!(roles.is_team_lead());
        assert_eq!(roles.highest(), Some(Role::Admin));
    }

    #[test]
    fn test_empty_set() {
        let roles = RoleSet::new();
        assert!(!roles.is_team_lead());
        assert!(roles.satisfies(Role::User));
        assert!(!roles.satisfies(Role::TeamLead));
        assert_eq!(roles.highest(), None);
    }

    #[test]
    fn test_from_assignments_filters_other_identities() {
        let assignments = vec![
            RoleAssignment::new("u1", Role::TeamLead),
            RoleAssignment::new("u2", Role::Admin),
            RoleAssignment::new("u1", Role::User),
        ];

        let roles = RoleSet::from_assignments("u1", &assignments);
        assert_eq!(roles.len(), 2);
        assert!(!roles.is_admin());
        assert_eq!(roles.to_string(), "[user, team_lead]");
    }
}
