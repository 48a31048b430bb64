use std::path::Component;

use crate::protocol::BreadcrumbItem;

use super::security::{ConfinedPath, UserRoot};

pub const HOME_LABEL: &str = "Home";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breadcrumb {
    pub label: String,
    pub path: ConfinedPath,
}

impl From<&Breadcrumb> for BreadcrumbItem {
    fn from(crumb: &Breadcrumb) -> Self {
        BreadcrumbItem {
            label: crumb.label.clone(),
            path: crumb.path.display_path(),
        }
    }
}

/// Ancestor chain from the home directory down to `current`, home first.
pub fn build(root: &UserRoot, current: &ConfinedPath) -> Vec<Breadcrumb> {
    let mut crumbs = vec![Breadcrumb {
        label: HOME_LABEL.to_string(),
        path: root.home(),
    }];

    let mut accumulated = root.home();
    for component in current.relative().components() {
        let Component::Normal(segment) = component else {
            continue;
        };
        let label = segment.to_string_lossy().to_string();
        accumulated = match accumulated.child(&label) {
            Ok(next) => next,
            Err(_) => break,
        };
        crumbs.push(Breadcrumb {
            label,
            path: accumulated.clone(),
        });
    }
    crumbs
}
