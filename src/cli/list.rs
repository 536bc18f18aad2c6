use crate::client_pool::ClientPoolHandle;
use crate::instance::{self, InstanceFilters};
use crate::region;
use anyhow::Result;
use comfy_table::{Cell, Table};
use serde::Serialize;

#[derive(Serialize)]
struct InstanceRow {
    instance_id: String,
    name: Option<String>,
    state: String,
    platform: String,
    private_ip: Option<String>,
    public_ip: Option<String>,
    ssm_state: String,
}

#[allow(clippy::too_many_arguments)]
pub async fn run(
    pool: &dyn ClientPoolHandle,
    region: &str,
    tags: Option<String>,
    status: Option<String>,
    name: Option<String>,
    table_output: bool,
    output: &str,
) -> Result<()> {
    let canonical_region = region::resolve(region)?;
    let filters = InstanceFilters {
        tags: tags.map(|t| instance::parse_tag_filters(&t)).transpose()?.unwrap_or_default(),
        state: status,
        name_substring: name,
    };

    let instances = instance::list(pool, &canonical_region, &filters).await?;
    let rows: Vec<InstanceRow> = instances
        .iter()
        .map(|i| InstanceRow {
            instance_id: i.instance_id.clone(),
            name: i.name.clone(),
            state: i.state.clone(),
            platform: format!("{:?}", i.platform),
            private_ip: i.private_ip.clone(),
            public_ip: i.public_ip.clone(),
            ssm_state: format!("{:?}", i.ssm_state),
        })
        .collect();

    if output == "json" {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if table_output {
        let mut table = Table::new();
        table.set_header(vec!["Instance ID", "Name", "State", "Platform", "Private IP", "Public IP", "SSM"]);
        for row in &rows {
            let state_cell = match row.state.as_str() {
                "running" => Cell::new(&row.state).fg(comfy_table::Color::Green),
                "stopped" => Cell::new(&row.state).fg(comfy_table::Color::Yellow),
                "terminated" => Cell::new(&row.state).fg(comfy_table::Color::Red),
                _ => Cell::new(&row.state),
            };
            table.add_row(vec![
                Cell::new(&row.instance_id),
                Cell::new(row.name.as_deref().unwrap_or("-")),
                state_cell,
                Cell::new(&row.platform),
                Cell::new(row.private_ip.as_deref().unwrap_or("-")),
                Cell::new(row.public_ip.as_deref().unwrap_or("-")),
                Cell::new(&row.ssm_state),
            ]);
        }
        println!("{table}");
    } else {
        for row in &rows {
            println!(
                "{}  {}  {}",
                row.instance_id,
                row.name.as_deref().unwrap_or("-"),
                row.state
            );
        }
    }

    Ok(())
}
