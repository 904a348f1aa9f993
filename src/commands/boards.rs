//! `inoc boards`: list installed boards.

use colored::*;

use crate::hardware::Catalog;
use crate::ui::Table;

/// One row per board: FQBN, display name, menus it offers.
pub fn board_rows(catalog: &Catalog, filter: Option<&str>) -> Vec<Vec<String>> {
    let filter = filter.map(str::to_lowercase);
    let mut rows = Vec::new();
    for package in catalog.packages() {
        for &platform_id in &package.platforms {
            let platform = catalog.platform(platform_id);
            for &board_id in &platform.boards {
                let board = catalog.board(board_id);
                let fqbn = catalog.fqbn(board_id);
                if let Some(f) = &filter
                    && !fqbn.to_lowercase().contains(f)
                    && !board.name().to_lowercase().contains(f)
                {
                    continue;
                }
                let menus: Vec<&str> = platform
                    .menus
                    .iter()
                    .filter(|(id, _)| board.has_menu(id))
                    .map(|(id, _)| id.as_str())
                    .collect();
                rows.push(vec![fqbn, board.name().to_string(), menus.join(", ")]);
            }
        }
    }
    rows
}

pub fn list_boards(catalog: &Catalog, filter: Option<&str>) {
    let rows = board_rows(catalog, filter);
    if rows.is_empty() {
        println!("{} No boards found", "x".red());
        return;
    }
    let mut table = Table::new(&["FQBN", "Name", "Menus"]);
    for row in rows {
        table.add_row(row);
    }
    table.print();
}
