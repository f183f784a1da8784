//! Menu tree assembly and pruning.

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use crate::models::{Capability, MenuNode};

/// Build the menu forest from the flat capability catalog.
///
/// Siblings keep the catalog's sort order. A capability whose parent is not in
/// the catalog becomes a root.
pub fn build_menu_tree(capabilities: &[Capability]) -> Vec<MenuNode> {
    let known: HashSet<Uuid> = capabilities.iter().map(|c| c.cap_id).collect();
    let mut children_of: HashMap<Option<Uuid>, Vec<&Capability>> = HashMap::new();
    for cap in capabilities {
        let parent = cap.parent_cap_id.filter(|p| known.contains(p) && *p != cap.cap_id);
        children_of.entry(parent).or_default().push(cap);
    }
    for siblings in children_of.values_mut() {
        siblings.sort_by(|a, b| {
            a.sort_order_val
                .cmp(&b.sort_order_val)
                .then_with(|| a.cap_code.cmp(&b.cap_code))
        });
    }

    let mut visited = HashSet::new();
    assemble(None, &children_of, &mut visited)
}

fn assemble(
    parent: Option<Uuid>,
    children_of: &HashMap<Option<Uuid>, Vec<&Capability>>,
    visited: &mut HashSet<Uuid>,
) -> Vec<MenuNode> {
    let Some(siblings) = children_of.get(&parent) else {
        return Vec::new();
    };
    let mut out = Vec::with_capacity(siblings.len());
    for cap in siblings {
        if visited.insert(cap.cap_id) {
            let children = assemble(Some(cap.cap_id), children_of, visited);
            out.push(MenuNode::with_children(&cap.cap_code, &cap.cap_label, children));
        }
    }
    out
}

/// Keep nodes whose code is allowed, plus any ancestor of an allowed node.
pub fn prune_menu_tree(nodes: &[MenuNode], allowed: &HashSet<String>) -> Vec<MenuNode> {
    nodes
        .iter()
        .filter_map(|node| {
            let children = prune_menu_tree(&node.children, allowed);
            if allowed.contains(&node.code) || !children.is_empty() {
                Some(MenuNode::with_children(&node.code, &node.label, children))
            } else {
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allowed(codes: &[&str]) -> HashSet<String> {
        codes.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_prune_keeps_allowed_and_drops_rest() {
        let tree = vec![
            MenuNode::with_children(
                "dashboard",
                "Dashboard",
                vec![MenuNode::leaf("battery_list", "Batteries")],
            ),
            MenuNode::leaf("warranty", "Warranty"),
        ];

        let pruned = prune_menu_tree(&tree, &allowed(&["dashboard", "battery_list"]));
        assert_eq!(pruned, vec![tree[0].clone()]);
    }

    #[test]
    fn test_prune_keeps_parent_of_allowed_descendant() {
        let tree = vec![MenuNode::with_children(
            "devices",
            "Devices",
            vec![
                MenuNode::with_children(
                    "battery",
                    "Battery",
                    vec![MenuNode::leaf("battery_control", "Control")],
                ),
                MenuNode::leaf("device_transfer", "Transfer"),
            ],
        )];

        let pruned = prune_menu_tree(&tree, &allowed(&["battery_control"]));
        assert_eq!(pruned.len(), 1);
        assert_eq!(
            pruned[0].codes(),
            vec!["devices", "battery", "battery_control"]
        );
    }

    #[test]
    fn test_prune_with_nothing_allowed() {
        let tree = vec![MenuNode::leaf("dashboard", "Dashboard")];
        assert!(prune_menu_tree(&tree, &HashSet::new()).is_empty());
    }

    #[test]
    fn test_build_nests_several_levels() {
        let top = Capability::new("devices", "Devices", None);
        let mid = Capability::new("battery_list", "Batteries", Some(top.cap_id));
        let leaf = Capability::new("battery_control", "Control", Some(mid.cap_id));
        let sibling = Capability::new("device_transfer", "Transfer", Some(top.cap_id)).with_sort_order(1);

        let tree = build_menu_tree(&[leaf, sibling, mid, top]);
        assert_eq!(tree.len(), 1);
        assert_eq!(
            tree[0].codes(),
            vec!["devices", "battery_list", "battery_control", "device_transfer"]
        );
    }

    #[test]
    fn test_build_orders_siblings_and_nests() {
        let root = Capability::new("dashboard", "Dashboard", None).with_sort_order(2);
        let first = Capability::new("battery_list", "Batteries", None).with_sort_order(1);
        let child = Capability::new("battery_detail", "Detail", Some(first.cap_id));
        let orphan = Capability::new("warranty", "Warranty", Some(Uuid::new_v4())).with_sort_order(3);

        let tree = build_menu_tree(&[root, child, orphan, first]);
        let codes: Vec<&str> = tree.iter().map(|n| n.code.as_str()).collect();
        assert_eq!(codes, vec!["battery_list", "dashboard", "warranty"]);
        assert_eq!(tree[0].children[0].code, "battery_detail");
    }
}
