/// Pilotage des programmes externes (transcodeur, lecteur de flux).
///
/// Ce module fournit :
///
/// - [`CommandTemplate`] : un programme et ses arguments avec des
///   emplacements `{input}`, `{output}`, `{bitrate}` remplis au lancement
/// - [`ManagedChild`] : un processus fils à portée limitée, dont la sortie
///   standard est lue en flux, et qui est toujours tué et récolté
/// - [`run_to_completion`] : exécution bloquante (au sens async) d'une
///   commande avec capture de l'erreur standard
///
/// # Examples
///
/// ```no_run
/// use pmoutils::CommandTemplate;
///
/// # async fn demo() -> Result<(), pmoutils::ProcessError> {
/// let tpl = CommandTemplate::new("ffmpeg", ["-i", "{input}", "-f", "mp3", "pipe:1"]);
/// let mut child = tpl.spawn_piped(&[("input", "/music/a.mp3")])?;
/// let stdout = child.take_stdout();
/// // ... lire stdout ...
/// child.terminate().await?;
/// # Ok(())
/// # }
/// ```
mod process;

pub use process::{run_to_completion, CommandTemplate, ManagedChild, ProcessError};
