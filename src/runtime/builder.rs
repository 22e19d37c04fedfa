use crate::models::options::ClientOptions;

/// Quote an argument for a POSIX shell. Plain words are left as they are.
pub fn shell_quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./:@%+=,".contains(c));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// Builder for manage_agents command lines
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    manage_exec: String,
    temp_dir: String,
    sudo: bool,
}

impl CommandBuilder {
    pub fn new(manage_exec: impl Into<String>, temp_dir: impl Into<String>, sudo: bool) -> Self {
        Self {
            manage_exec: manage_exec.into(),
            temp_dir: temp_dir.into(),
            sudo,
        }
    }

    pub fn from_options(options: &ClientOptions) -> Self {
        Self::new(options.manage_exec(), options.temp_dir.clone(), !options.no_sudo)
    }

    fn privileged(&self, command: String) -> String {
        if self.sudo {
            format!("sudo {}", command)
        } else {
            command
        }
    }

    fn manage(&self, args: &str) -> String {
        self.privileged(format!("{} {}", shell_quote(&self.manage_exec), args))
    }

    /// `manage_agents -l`
    pub fn list_agents(&self) -> String {
        self.manage("-l")
    }

    /// `manage_agents -e <id>`
    pub fn export_key(&self, id: &str) -> String {
        self.manage(&format!("-e {}", shell_quote(id)))
    }

    /// `manage_agents -r <id>`
    pub fn remove_agent(&self, id: &str) -> String {
        self.manage(&format!("-r {}", shell_quote(id)))
    }

    /// Remote scratch file used for a bulk import of `host`
    pub fn import_file(&self, host: &str) -> String {
        format!(
            "{}/ossec_import.{}.lst",
            self.temp_dir.trim_end_matches('/'),
            host
        )
    }

    /// Write `<ip>,<host>` to the scratch file, import it with `manage_agents -f`, then delete it
    pub fn import_agent(&self, host: &str, ip: &str) -> String {
        let file = shell_quote(&self.import_file(host));
        let entry = shell_quote(&format!("{},{}", ip, host));

        let write = format!(
            "printf '%s\\n' {} | {} > /dev/null",
            entry,
            self.privileged(format!("tee {}", file))
        );
        let import = self.manage(&format!("-f {}", file));
        let cleanup = self.privileged(format!("rm -f {}", file));

        format!("{} && {} && {}", write, import, cleanup)
    }
}
