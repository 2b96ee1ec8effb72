// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use blockstore::audiofile::AudioFile;
use blockstore::blockfile::inspect_file;
use blockstore::config::{load_storage_config, StorageConfig};
use blockstore::context::StorageContext;
use blockstore::dirmanager::{DirManager, FsckStatus, ProjectFile, ScriptedPrompt};
use blockstore::format::SampleBuffer;
use blockstore::ondemand::{ComputeSummaryTask, OdManager, OdTask};
use clap::{crate_version, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "Block-file audio storage tools."
)]
struct Cli {
    /// A YAML storage config. Defaults apply when omitted.
    #[clap(long, global = true)]
    config: Option<PathBuf>,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Checks a project's block files against its document.
    Fsck {
        /// The project document. Its data directory sits beside it, named
        /// after the document without the extension.
        project: PathBuf,
        /// Applies the safe repairs without asking.
        #[clap(long)]
        auto_recover: bool,
        /// Runs the checks as though the document failed to load.
        #[clap(long)]
        force_error: bool,
        /// Answers to the repair prompts, in the order they are asked.
        /// Unanswered prompts take the first option.
        #[clap(long = "choice")]
        choices: Vec<usize>,
    },
    /// Prints the length, format and statistics of a block file.
    Info {
        /// An .au data file or .auf summary file.
        file: PathBuf,
    },
    /// Lists block files in a project's data directory that no block uses.
    Orphans {
        /// The project document.
        project: PathBuf,
        /// Deletes the listed files.
        #[clap(long)]
        remove: bool,
    },
    /// Imports one channel of an audio file as a new project.
    Import {
        /// The audio file to import.
        audio: PathBuf,
        /// The directory to hold the project document and its data.
        project_dir: PathBuf,
        /// The project name.
        name: String,
        /// The channel to import.
        #[clap(long, default_value_t = 0)]
        channel: usize,
        /// References the audio in place instead of copying it.
        #[clap(long, conflicts_with = "on_demand")]
        alias: bool,
        /// Like --alias, but computes summaries in the background.
        #[clap(long)]
        on_demand: bool,
    },
}

#[derive(Clone, Copy, PartialEq)]
enum ImportMode {
    Copy,
    Alias,
    OnDemand,
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => load_storage_config(path)?,
        None => StorageConfig::default(),
    };
    let ctx = StorageContext::new(config);
    let failures = ctx.messages().batch();

    match cli.command {
        Commands::Fsck {
            project,
            auto_recover,
            force_error,
            choices,
        } => fsck(ctx.clone(), &project, auto_recover, force_error, &choices)?,
        Commands::Info { file } => {
            let report = inspect_file(&file)?;
            println!("{}", report.path.display());
            if let Some(len) = report.len {
                println!("- length: {} samples", len);
            }
            if let Some(format) = report.format {
                println!("- format: {}", format);
            }
            println!("- min: {}", report.stats.min);
            println!("- max: {}", report.stats.max);
            println!("- rms: {}", report.stats.rms);
        }
        Commands::Orphans { project, remove } => {
            let (mut dm, loaded) = open_project(ctx.clone(), &project)?;
            let orphans = dm.orphan_block_files();
            if orphans.is_empty() {
                println!("No orphan block files.");
            } else {
                println!("Orphan block files (count: {}):", orphans.len());
                for orphan in &orphans {
                    println!("- {}", orphan.display());
                }
                if remove {
                    println!("Removed {}.", dm.remove_orphan_blockfiles());
                }
            }
            loaded.close();
        }
        Commands::Import {
            audio,
            project_dir,
            name,
            channel,
            alias,
            on_demand,
        } => {
            let mode = if on_demand {
                ImportMode::OnDemand
            } else if alias {
                ImportMode::Alias
            } else {
                ImportMode::Copy
            };
            import(ctx.clone(), &audio, &project_dir, &name, channel, mode)?;
        }
    }

    let failures = failures.finish();
    if failures > 0 {
        println!("Storage failures after the first: {}", failures);
    }
    Ok(())
}

/// Splits a document path into the directory and name of its data
/// directory.
fn data_dir_of(project: &Path) -> Result<(PathBuf, String), Box<dyn Error>> {
    let name = project
        .file_stem()
        .and_then(|stem| stem.to_str())
        .ok_or_else(|| format!("{} has no usable file name", project.display()))?;
    let dir = match project.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((dir, name.to_string()))
}

fn open_project(
    ctx: Arc<StorageContext>,
    project: &Path,
) -> Result<(DirManager, ProjectFile), Box<dyn Error>> {
    let (dir, name) = data_dir_of(project)?;
    let mut dm = DirManager::new(ctx)?;
    if !dm.set_project(&dir, &name, false) {
        return Err(format!("no data directory {} beside the project", name).into());
    }
    let loaded = ProjectFile::load(&mut dm, project)?;
    Ok((dm, loaded))
}

fn fsck(
    ctx: Arc<StorageContext>,
    project: &Path,
    auto_recover: bool,
    force_error: bool,
    choices: &[usize],
) -> Result<(), Box<dyn Error>> {
    let (mut dm, loaded) = open_project(ctx, project)?;

    let prompt = ScriptedPrompt::new();
    for choice in choices.iter().rev() {
        prompt.push(*choice);
    }
    let force_error = force_error || loaded.failed_blocks() > 0;
    let status = dm.project_fsck(force_error, auto_recover, &prompt);
    println!("Check finished: {}", status);

    if !status.contains(FsckStatus::CLOSE_REQ)
        && (status.contains(FsckStatus::CHANGED) || status.contains(FsckStatus::SAVE_AUP))
    {
        loaded.save(project)?;
        info!(project = ?project, "Saved repaired project");
    }
    loaded.close();
    Ok(())
}

fn import(
    ctx: Arc<StorageContext>,
    audio: &Path,
    project_dir: &Path,
    name: &str,
    channel: usize,
    mode: ImportMode,
) -> Result<(), Box<dyn Error>> {
    let audio = fs::canonicalize(audio)?;
    let mut file = AudioFile::open(&audio)?;
    if channel >= file.channels() {
        return Err(format!("{} has only {} channels", audio.display(), file.channels()).into());
    }

    fs::create_dir_all(project_dir)?;
    let mut dm = DirManager::new(ctx.clone())?;
    if !dm.set_project(project_dir, name, true) {
        return Err(format!("unable to use {} as the project directory", name).into());
    }

    let format = file.native_format();
    let block_len = ctx.config().max_block_samples();
    let dither = ctx.config().dither(false);
    let project = ProjectFile::new(format, block_len);

    let mut start = 0u64;
    if mode == ImportMode::Copy {
        loop {
            let mut buf = SampleBuffer::new(format, block_len);
            let read = file.read(&mut buf, 0, start, block_len, channel, dither)?;
            if read == 0 {
                break;
            }
            buf.resize(read);
            let block = dm.new_simple_block_file(&buf, false)?;
            project.blocks().lock().append(block);
            start += read as u64;
        }
    } else {
        let frames = file
            .frames()
            .ok_or_else(|| format!("the length of {} is unknown", audio.display()))?;
        while start < frames {
            let len = (frames - start).min(block_len as u64) as usize;
            let block = if mode == ImportMode::OnDemand {
                dm.new_od_alias_block_file(&audio, start, len, channel)?
            } else {
                dm.new_alias_block_file(&audio, start, len, channel)?
            };
            project.blocks().lock().append(block);
            start += len as u64;
        }
    }

    if mode == ImportMode::OnDemand {
        let manager = OdManager::new(&ctx)?;
        let task = OdTask::new(&ctx, Box::new(ComputeSummaryTask::new()));
        task.add_track(project.blocks().clone());
        manager.add_task(task);
        manager.run_until_idle();
        manager.shutdown();
    }

    let document = project_dir.join(format!("{}.xml", name));
    project.save(&document)?;
    project.close();
    println!(
        "Imported {} samples in {} blocks to {}.",
        project.num_samples(),
        project.blocks().lock().len(),
        document.display()
    );
    Ok(())
}
