//! `lode ls`

use anyhow::Result;
use comfy_table::Table;

use crate::project::Project;
use crate::report;

pub fn run() -> Result<()> {
    let mut project = Project::load()?;
    let resolution = match project.resolve() {
        Ok(resolution) => resolution,
        Err(err) => {
            report::render(&project.events);
            return Err(err);
        }
    };

    let mut table = Table::new();
    table.set_header(["package", "version", "kind", "visibility", "commit"]);

    for (name, resolved) in &resolution.packages {
        let visibility = project
            .package
            .deps
            .get(name.as_str())
            .map_or_else(|| "public".to_string(), |req| req.visibility.to_string());
        let commit = resolved
            .package
            .version_meta(resolved.version)
            .map_or("", |meta| meta.commit.as_str());
        table.add_row(vec![
            name.to_string(),
            resolved.version.to_string(),
            resolved.kind.to_string(),
            visibility,
            commit.to_string(),
        ]);
    }

    println!("{table}");
    Ok(())
}
