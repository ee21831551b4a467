//! Plan computation — pure diff between desired and running.

use std::collections::{BTreeMap, HashSet};

use fleetup_model::{ApplicationIdentity, DeploymentRecord};

/// One grouped operation against the local supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppAction {
    Install(DeploymentRecord),
    Uninstall(ApplicationIdentity),
    /// Version swap: an application name with both removals and additions
    /// in the same tick is always one atomic update, never an
    /// uninstall-then-install pair.
    Update {
        name: String,
        old: Vec<ApplicationIdentity>,
        new: Vec<DeploymentRecord>,
    },
}

impl AppAction {
    /// Short label for logs and error aggregation.
    pub fn describe(&self) -> String {
        match self {
            Self::Install(record) => format!("install {}", record.identity()),
            Self::Uninstall(identity) => format!("uninstall {identity}"),
            Self::Update { name, old, new } => format!(
                "update {name} ({} -> {})",
                old.iter()
                    .map(|id| id.version().to_string())
                    .collect::<Vec<_>>()
                    .join(","),
                new.iter()
                    .map(|r| r.identity().version().to_string())
                    .collect::<Vec<_>>()
                    .join(",")
            ),
        }
    }
}

/// The work one tick has to do, grouped per application name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    actions: Vec<AppAction>,
}

impl ReconcilePlan {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn actions(&self) -> &[AppAction] {
        &self.actions
    }

    pub fn into_actions(self) -> Vec<AppAction> {
        self.actions
    }

    /// Records whose binaries must be fetched before applying: every
    /// addition, whether it lands as an install or inside an update.
    pub fn deployments(&self) -> Vec<&DeploymentRecord> {
        self.actions
            .iter()
            .flat_map(|action| match action {
                AppAction::Install(record) => vec![record],
                AppAction::Update { new, .. } => new.iter().collect(),
                AppAction::Uninstall(_) => vec![],
            })
            .collect()
    }

    /// Identities this plan takes out of service: every uninstall, plus
    /// the outgoing side of every update.
    pub fn retired_identities(&self) -> Vec<ApplicationIdentity> {
        self.actions
            .iter()
            .flat_map(|action| match action {
                AppAction::Uninstall(identity) => vec![identity.clone()],
                AppAction::Update { old, .. } => old.clone(),
                AppAction::Install(_) => vec![],
            })
            .collect()
    }

    pub fn install_count(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| matches!(a, AppAction::Install(_)))
            .count()
    }

    pub fn uninstall_count(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| matches!(a, AppAction::Uninstall(_)))
            .count()
    }

    pub fn update_count(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| matches!(a, AppAction::Update { .. }))
            .count()
    }
}

/// Diff desired records against running identities.
///
/// `to_remove` = running but not desired; `to_deploy` = desired but not
/// running. Both are grouped by application name: a name appearing on
/// both sides becomes one `Update`, otherwise each entry becomes an
/// independent `Install` or `Uninstall`. Actions come out in name order.
pub fn build_plan(
    desired: &[DeploymentRecord],
    running: &[ApplicationIdentity],
) -> ReconcilePlan {
    let desired_ids: HashSet<&ApplicationIdentity> =
        desired.iter().map(|r| r.identity()).collect();
    let running_ids: HashSet<&ApplicationIdentity> = running.iter().collect();

    type Group = (Vec<ApplicationIdentity>, Vec<DeploymentRecord>);
    let mut groups: BTreeMap<String, Group> = BTreeMap::new();

    for identity in running.iter().filter(|id| !desired_ids.contains(id)) {
        groups
            .entry(identity.name().to_string())
            .or_default()
            .0
            .push(identity.clone());
    }
    for record in desired.iter().filter(|r| !running_ids.contains(r.identity())) {
        groups
            .entry(record.identity().name().to_string())
            .or_default()
            .1
            .push(record.clone());
    }

    let actions = groups
        .into_iter()
        .flat_map(|(name, (old, new))| match (old.is_empty(), new.is_empty()) {
            (false, false) => vec![AppAction::Update { name, old, new }],
            (true, false) => new.into_iter().map(AppAction::Install).collect(),
            (false, true) => old.into_iter().map(AppAction::Uninstall).collect(),
            (true, true) => vec![],
        })
        .collect();

    ReconcilePlan { actions }
}

#[cfg(test)]
mod tests {
    use super::*;
    use semver::Version;

    fn id(name: &str, version: &str) -> ApplicationIdentity {
        ApplicationIdentity::new(name, Version::parse(version).unwrap())
    }

    fn record(name: &str, version: &str) -> DeploymentRecord {
        DeploymentRecord::new(id(name, version), "east")
    }

    #[test]
    fn empty_diff_yields_empty_plan() {
        let desired = vec![record("a", "1.0.0")];
        let running = vec![id("a", "1.0.0")];
        assert!(build_plan(&desired, &running).is_empty());
    }

    #[test]
    fn diff_groups_update_install_and_uninstall() {
        // running = {a@1.0, b@1.0}, desired = {a@1.0, b@2.0, c@1.0}:
        // no change for a, version swap for b, install for c.
        let desired = vec![record("a", "1.0.0"), record("b", "2.0.0"), record("c", "1.0.0")];
        let running = vec![id("a", "1.0.0"), id("b", "1.0.0")];

        let plan = build_plan(&desired, &running);
        assert_eq!(plan.update_count(), 1);
        assert_eq!(plan.install_count(), 1);
        assert_eq!(plan.uninstall_count(), 0);

        assert_eq!(
            plan.actions(),
            &[
                AppAction::Update {
                    name: "b".to_string(),
                    old: vec![id("b", "1.0.0")],
                    new: vec![record("b", "2.0.0")],
                },
                AppAction::Install(record("c", "1.0.0")),
            ]
        );
    }

    #[test]
    fn removal_only_name_becomes_uninstall() {
        let plan = build_plan(&[], &[id("a", "1.0.0")]);
        assert_eq!(plan.actions(), &[AppAction::Uninstall(id("a", "1.0.0"))]);
    }

    #[test]
    fn multi_version_swap_is_one_update() {
        // Both 1.x versions leave, both 2.x arrive: still one update.
        let desired = vec![record("a", "2.0.0"), record("a", "2.1.0")];
        let running = vec![id("a", "1.0.0"), id("a", "1.1.0")];

        let plan = build_plan(&desired, &running);
        assert_eq!(plan.update_count(), 1);
        match &plan.actions()[0] {
            AppAction::Update { old, new, .. } => {
                assert_eq!(old.len(), 2);
                assert_eq!(new.len(), 2);
            }
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[test]
    fn deployments_cover_installs_and_update_targets() {
        let desired = vec![record("b", "2.0.0"), record("c", "1.0.0")];
        let running = vec![id("b", "1.0.0"), id("d", "1.0.0")];

        let plan = build_plan(&desired, &running);
        let names: Vec<_> = plan
            .deployments()
            .into_iter()
            .map(|r| r.identity().to_string())
            .collect();
        assert_eq!(names, vec!["b@2.0.0", "c@1.0.0"]);
    }

    #[test]
    fn retired_identities_cover_uninstalls_and_update_sources() {
        let desired = vec![record("b", "2.0.0")];
        let running = vec![id("b", "1.0.0"), id("d", "1.0.0")];

        let plan = build_plan(&desired, &running);
        assert_eq!(
            plan.retired_identities(),
            vec![id("b", "1.0.0"), id("d", "1.0.0")]
        );
    }

    #[test]
    fn independent_names_yield_independent_actions() {
        let desired = vec![record("a", "1.0.0")];
        let running = vec![id("b", "1.0.0")];

        let plan = build_plan(&desired, &running);
        assert_eq!(plan.install_count(), 1);
        assert_eq!(plan.uninstall_count(), 1);
        assert_eq!(plan.update_count(), 0);
    }

    #[test]
    fn actions_come_out_in_name_order() {
        let desired = vec![record("zeta", "1.0.0"), record("alpha", "1.0.0")];
        let plan = build_plan(&desired, &[]);
        assert_eq!(
            plan.actions(),
            &[
                AppAction::Install(record("alpha", "1.0.0")),
                AppAction::Install(record("zeta", "1.0.0")),
            ]
        );
    }
}
