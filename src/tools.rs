use std::path::PathBuf;

#[cfg(windows)]
pub const MYSQLSH: &str = "mysqlsh.exe";
#[cfg(not(windows))]
pub const MYSQLSH: &str = "mysqlsh";

/// Search PATH and the usual MySQL Shell install dirs for `mysqlsh`.
pub fn find_mysqlsh() -> Option<PathBuf> {
    find(MYSQLSH, &install_dirs())
}

/// Search PATH first, then `extra_dirs`, for an executable named `name`.
pub fn find(name: &str, extra_dirs: &[PathBuf]) -> Option<PathBuf> {
    if let Some(p) = find_in_path(name) {
        return Some(p);
    }

    extra_dirs
        .iter()
        .map(|dir| dir.join(name))
        .find(|path| path.is_file())
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    std::env::var_os("PATH").and_then(|paths| {
        std::env::split_paths(&paths)
            .map(|dir| dir.join(name))
            .find(|path| path.is_file())
    })
}

fn install_dirs() -> Vec<PathBuf> {
    let mut dirs_to_check: Vec<PathBuf> = Vec::new();

    #[cfg(windows)]
    {
        for root in ["C:\\Program Files\\MySQL", "C:\\Program Files (x86)\\MySQL"] {
            // Installs are versioned: "MySQL Shell 8.0", "MySQL Shell 8.4", ...
            if let Ok(entries) = std::fs::read_dir(root) {
                let mut shells: Vec<PathBuf> = entries
                    .filter_map(|e| e.ok().map(|e| e.path()))
                    .filter(|p| {
                        p.file_name()
                            .map(|n| n.to_string_lossy().starts_with("MySQL Shell"))
                            .unwrap_or(false)
                    })
                    .collect();
                shells.sort();
                dirs_to_check.extend(shells.into_iter().rev().map(|p| p.join("bin")));
            }
        }
    }

    #[cfg(not(windows))]
    {
        dirs_to_check.extend(
            [
                "/usr/local/mysql-shell/bin",
                "/opt/mysql-shell/bin",
                "/usr/local/bin",
                "/opt/homebrew/bin",
            ]
            .into_iter()
            .map(PathBuf::from),
        );
    }

    if let Some(home) = dirs::home_dir() {
        dirs_to_check.push(home.join(".local/bin"));
    }

    dirs_to_check
}
