use crate::config::CostingConfig;
use crate::support::{load_nodes_or_exit, print_json_or_exit};
use costing_tree::{WbsNode, check_tree};
use serde_json::json;

pub fn run_show(config: &CostingConfig, tree: Option<String>, json_output: bool) {
    let store = load_nodes_or_exit(&config.nodes_path);
    let nodes: Vec<&WbsNode> = store
        .nodes()
        .filter(|node| tree.as_deref().is_none_or(|t| node.tree == t))
        .collect();

    if json_output {
        print_json_or_exit(&json!({
            "action": "costing.tree",
            "nodesPath": config.nodes_path.display().to_string(),
            "trees": store.trees(),
            "count": nodes.len(),
            "nodes": nodes
        }));
        return;
    }

    println!(
        "costing tree\n  Path: {}\n  Nodes: {}",
        config.nodes_path.display(),
        nodes.len()
    );
    for line in store.render_tree(tree.as_deref()).lines() {
        println!("  {line}");
    }
}

pub fn run_check(config: &CostingConfig, json_output: bool) {
    let store = load_nodes_or_exit(&config.nodes_path);
    let report = check_tree(&store, config.max_level);

    if json_output {
        print_json_or_exit(&report);
    } else {
        println!(
            "[tree] {} (nodes={}, roots={}, groups={}, errors={}, warnings={})",
            if report.accepted() { "OK" } else { "FAIL" },
            report.summary.node_count,
            report.summary.root_count,
            report.summary.group_count,
            report.summary.error_count,
            report.summary.warning_count
        );
        for finding in &report.errors {
            println!("  - {} {} ({})", finding.node_key, finding.class, finding.message);
        }
        for finding in &report.warnings {
            println!("  - WARN {} {} ({})", finding.node_key, finding.class, finding.message);
        }
    }

    if !report.accepted() {
        std::process::exit(1);
    }
}
