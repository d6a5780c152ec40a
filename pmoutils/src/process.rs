use std::{io, process::ExitStatus, process::Stdio};

use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, trace};

/// Taille maximale de l'erreur standard conservée dans [`ProcessError::Failed`].
const MAX_STDERR_LEN: usize = 2048;

/// Erreurs liées aux processus externes.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("program not found: {program}")]
    NotFound { program: String },

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: ExitStatus,
        stderr: String,
    },
}

/// Programme externe et arguments avec emplacements nommés.
///
/// Chaque argument peut contenir des emplacements `{nom}` remplacés au
/// lancement par [`CommandTemplate::render`]. Les emplacements inconnus sont
/// laissés tels quels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandTemplate {
    pub fn new<P, I, S>(program: P, args: I) -> Self
    where
        P: Into<String>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Substitue les emplacements dans les arguments.
    pub fn render(&self, vars: &[(&str, &str)]) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                vars.iter().fold(arg.clone(), |acc, (name, value)| {
                    acc.replace(&format!("{{{name}}}"), value)
                })
            })
            .collect()
    }

    /// Construit la commande tokio correspondante, stdin fermé.
    pub fn command(&self, vars: &[(&str, &str)]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.render(vars)).stdin(Stdio::null());
        cmd
    }

    /// Lance le programme avec la sortie standard redirigée vers un tube.
    pub fn spawn_piped(&self, vars: &[(&str, &str)]) -> Result<ManagedChild, ProcessError> {
        ManagedChild::spawn_piped(self.command(vars), &self.program)
    }

    /// Lance le programme et attend sa fin.
    pub async fn run(&self, vars: &[(&str, &str)]) -> Result<(), ProcessError> {
        run_to_completion(self.command(vars), &self.program).await
    }
}

fn spawn_error(program: &str, err: io::Error) -> ProcessError {
    if err.kind() == io::ErrorKind::NotFound {
        ProcessError::NotFound {
            program: program.to_string(),
        }
    } else {
        ProcessError::Spawn {
            program: program.to_string(),
            source: err,
        }
    }
}

/// Processus fils dont la durée de vie est liée à cette valeur.
///
/// Le processus est tué si la valeur est abandonnée sans avoir été attendue
/// (`kill_on_drop`). [`ManagedChild::terminate`] tue et récolte explicitement.
#[derive(Debug)]
pub struct ManagedChild {
    child: Child,
    program: String,
}

impl ManagedChild {
    /// Lance `cmd` avec stdout en tube et stderr ignoré.
    pub fn spawn_piped(mut cmd: Command, program: &str) -> Result<Self, ProcessError> {
        cmd.stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| spawn_error(program, e))?;
        debug!(program, pid = ?child.id(), "Spawned child process");

        Ok(Self {
            child,
            program: program.to_string(),
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Récupère la sortie standard (une seule fois).
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Attend la fin naturelle du processus.
    pub async fn wait(&mut self) -> Result<ExitStatus, ProcessError> {
        Ok(self.child.wait().await?)
    }

    /// Tue le processus s'il tourne encore, puis le récolte.
    pub async fn terminate(&mut self) -> Result<ExitStatus, ProcessError> {
        if let Some(status) = self.child.try_wait()? {
            return Ok(status);
        }
        trace!(program = %self.program, pid = ?self.child.id(), "Killing child process");
        if let Err(e) = self.child.start_kill() {
            // Le processus a pu se terminer entre try_wait et start_kill
            if e.kind() != io::ErrorKind::InvalidInput {
                return Err(e.into());
            }
        }
        Ok(self.child.wait().await?)
    }
}

/// Exécute `cmd` jusqu'à sa fin, stdout ignoré, stderr capturé.
///
/// Retourne [`ProcessError::Failed`] si le code de sortie est non nul.
pub async fn run_to_completion(mut cmd: Command, program: &str) -> Result<(), ProcessError> {
    cmd.stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd.spawn().map_err(|e| spawn_error(program, e))?;
    let output = child.wait_with_output().await?;

    if output.status.success() {
        return Ok(());
    }

    let mut stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if stderr.len() > MAX_STDERR_LEN {
        let mut cut = MAX_STDERR_LEN;
        while !stderr.is_char_boundary(cut) {
            cut -= 1;
        }
        stderr.truncate(cut);
    }

    Err(ProcessError::Failed {
        program: program.to_string(),
        status: output.status,
        stderr,
    })
}
