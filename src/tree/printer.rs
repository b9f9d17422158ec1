//! ASCII rendering of dependency trees
//!
//! Output is deterministic: children are visited in name order, and the
//! ancestor path is copied per child exactly like the builder does, so a
//! workload repeated in an unrelated branch is printed in full again.

use std::io::{self, Write};

use super::{AncestorPath, Node};

const CIRCULAR_MARKER: &str = " (CIRCULAR DEPENDENCY)";

/// Print `node` and its subtree
///
/// `prefix` is the indentation inherited from ancestors and `is_last`
/// selects the connector glyph. The sentinel root prints as `.`.
pub fn print_tree<W: Write>(
    out: &mut W,
    node: &Node,
    prefix: &str,
    is_last: bool,
    ancestors: &AncestorPath,
) -> io::Result<()> {
    let connector = if is_last { "└── " } else { "├── " };

    if !node.is_sentinel() && (node.is_circular || ancestors.contains(&node.name)) {
        return writeln!(
            out,
            "{}{}{}{}",
            prefix, connector, node.name, CIRCULAR_MARKER
        );
    }

    let mut path = ancestors.clone();
    let child_prefix = if node.is_sentinel() {
        writeln!(out, ".")?;
        prefix.to_string()
    } else {
        writeln!(out, "{}{}{}", prefix, connector, node.name)?;
        path.insert(node.name.clone());
        if is_last {
            format!("{}    ", prefix)
        } else {
            format!("{}│   ", prefix)
        }
    };

    let count = node.children.len();
    for (i, child) in node.children.values().enumerate() {
        print_tree(out, child, &child_prefix, i + 1 == count, &path)?;
    }

    Ok(())
}

/// Print a whole tree starting at its top node
pub fn write_tree<W: Write>(out: &mut W, root: &Node) -> io::Result<()> {
    print_tree(out, root, "", true, &AncestorPath::new())
}

/// Render a whole tree to a string
pub fn render_tree(root: &Node) -> String {
    let mut buf = Vec::new();
    write_tree(&mut buf, root).expect("writing to a Vec cannot fail");
    String::from_utf8_lossy(&buf).into_owned()
}
