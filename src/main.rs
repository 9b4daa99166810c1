use std::io::{self, Write as _};
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use c42arc::archive::BackupArchive;
use c42arc::config::{load_properties, ArchiveConfig};
use c42arc::manifest::FilenameMatchMode;

#[derive(Parser)]
#[command(name = "c42arc", version = "1.0.0", about = "Reader and restore tool for Code42/CrashPlan backup archives")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a CrashPlan 'adb' key-store directory to recover a decryption key from
    #[arg(long, global = true)]
    adb: Option<PathBuf>,

    /// Path to a `.properties` file carrying secureDataKey/dataKeyChecksum
    #[arg(long, global = true)]
    cpproperties: Option<PathBuf>,

    /// Archive decryption key, hex-encoded
    #[arg(long, global = true)]
    key: Option<String>,

    /// Archive decryption key, base64-encoded
    #[arg(long, global = true)]
    key64: Option<String>,

    /// Passphrase to brute-force a decryption key against --user-id-range
    /// and the dataKeyChecksum recorded in --cpproperties
    #[arg(long, global = true)]
    passphrase: Option<String>,

    /// Inclusive "start:end" user-id range to search when --passphrase is given
    #[arg(long, global = true)]
    user_id_range: Option<String>,

    /// Root of the backup archive
    #[arg(long, global = true)]
    archive: Option<PathBuf>,

    /// Prefix of the archived filepath to operate on
    #[arg(long, global = true)]
    prefix: Option<String>,

    /// Exact archived filepath to operate on
    #[arg(long, global = true)]
    filename: Option<String>,

    /// Include deleted files
    #[arg(long, global = true)]
    include_deleted: bool,

    /// Restore/list files as of this date (yyyy-mm-dd hh:mm:ss); newest if omitted
    #[arg(long, global = true)]
    at: Option<String>,

    /// Destination directory for restored files
    #[arg(long, global = true)]
    dest: Option<PathBuf>,

    /// Verify integrity without writing restored files to disk
    #[arg(long, global = true)]
    dry_run: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Recover your backup encryption key from a CrashPlan ADB directory
    RecoverKey,
    /// Dump every unobfuscated key-store value, then recover the decryption key
    RecoverKeys,
    /// Print the KDF-v2 output for a user-id/passphrase pair
    DeriveKey {
        user_id: String,
        passphrase: String,
    },
    /// List all filenames that were ever in the backup (including deleted)
    List,
    /// List the newest version of files in the backup
    ListDetailed,
    /// List all versions of the files in the backup
    ListAll,
    /// Restore files
    Restore,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        log::error!("{e}");
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match &cli.command {
        Commands::DeriveKey { user_id, passphrase } => {
            let key = c42arc::derive_archive_key_v2(user_id, passphrase);
            println!("{}", hex::encode(key));
            return Ok(());
        }
        _ => {}
    }

    let config = build_config(&cli)?;

    if matches!(cli.command, Commands::RecoverKey | Commands::RecoverKeys) {
        let key = recover_key(&cli, &config)?;
        println!("{}", hex::encode(&key));
        return Ok(());
    }

    let archive_key = resolve_archive_key(&config)?;

    let match_mode = match (&cli.prefix, &cli.filename) {
        (Some(p), None) => FilenameMatchMode::Prefix(p.clone()),
        (None, Some(f)) => FilenameMatchMode::Equals(f.clone()),
        (None, None) => FilenameMatchMode::None,
        (Some(_), Some(_)) => return Err("you can't combine --prefix and --filename".into()),
    };

    let archive_root = config
        .archive_root
        .clone()
        .ok_or("the --archive flag is required for this command")?;
    let archive = BackupArchive::open(&archive_root, archive_key)?;

    let at_ms = cli
        .at
        .as_deref()
        .map(parse_at_time)
        .transpose()?;

    match cli.command {
        Commands::List | Commands::ListDetailed | Commands::ListAll => {
            run_list(&archive, match_mode, at_ms, cli.include_deleted, matches!(cli.command, Commands::ListAll))?;
        }
        Commands::Restore => {
            let dest = cli.dest.clone().ok_or("the --dest flag is required for restore")?;
            run_restore(&archive, match_mode, at_ms, cli.include_deleted, &dest, cli.dry_run)?;
        }
        Commands::RecoverKey | Commands::RecoverKeys | Commands::DeriveKey { .. } => unreachable!(),
    }

    Ok(())
}

fn build_config(cli: &Cli) -> Result<ArchiveConfig, Box<dyn std::error::Error>> {
    let mut config = ArchiveConfig {
        archive_root: cli.archive.clone(),
        adb_path: cli.adb.clone(),
        raw_key_hex: cli.key.clone(),
        raw_key_b64: cli.key64.clone(),
        passphrase: cli.passphrase.clone(),
        user_id_range: cli.user_id_range.clone(),
        dest: cli.dest.clone(),
        prefix: cli.prefix.clone(),
        filename: cli.filename.clone(),
        include_deleted: cli.include_deleted,
        dry_run: cli.dry_run,
        ..Default::default()
    };

    if let Some(path) = &cli.cpproperties {
        let props = load_properties(path)?;
        config.merge_properties(&props);
    }

    Ok(config)
}

fn resolve_archive_key(config: &ArchiveConfig) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    if let Some(hex_key) = &config.raw_key_hex {
        return Ok(hex::decode(hex_key)?);
    }
    if let Some(b64_key) = &config.raw_key_b64 {
        use base64::{engine::general_purpose::STANDARD, Engine as _};
        return Ok(STANDARD.decode(b64_key)?);
    }
    if let Some(envelope) = &config.secure_data_key {
        let password = prompt_password()?;
        return Ok(c42arc::decrypt_secure_data_key(envelope, &password)?);
    }
    if let (Some(passphrase), Some(range), Some(checksum_hex)) =
        (&config.passphrase, &config.user_id_range, &config.data_key_checksum)
    {
        let (start, end) = parse_user_id_range(range)?;
        let checksum = hex::decode(checksum_hex)?;
        let expected: [u8; 16] = checksum
            .try_into()
            .map_err(|_| "dataKeyChecksum must decode to exactly 16 bytes")?;
        log::info!("brute-forcing user-id in {start}..={end} against dataKeyChecksum");
        let (found_id, key) = c42arc::recover::recover_user_id(start..=end, passphrase, &expected)
            .ok_or("no user-id in the given range produced a key matching dataKeyChecksum")?;
        log::info!("recovered archive key for user-id {found_id}");
        return Ok(key);
    }
    Err("couldn't find your decryption key automatically; supply one of --adb, --key, --key64, --cpproperties (secureDataKey), or --passphrase with --user-id-range and a dataKeyChecksum".into())
}

fn parse_user_id_range(s: &str) -> Result<(u64, u64), Box<dyn std::error::Error>> {
    let (start, end) = s.split_once(':').ok_or("--user-id-range must be \"start:end\"")?;
    Ok((start.trim().parse()?, end.trim().parse()?))
}

fn recover_key(cli: &Cli, config: &ArchiveConfig) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let adb_path = config.adb_path.clone().ok_or("the --adb flag is required to recover a key")?;
    let backend = c42arc::keystore::backend::FlatFileKeyStore::open(adb_path.join("keystore.dat"))?;
    let platform_keys = c42arc::keystore::platform::PlatformKeys::default();
    let store = c42arc::KeyStore::new(backend, platform_keys);

    if matches!(cli.command, Commands::RecoverKeys) {
        eprintln!("All unobfuscated values from adb:");
        for (key, value) in store.read_all_keys()? {
            match value {
                Ok(plain) if plain.iter().all(|&b| b.is_ascii_graphic() || b == b' ') => {
                    println!("{}= {}", String::from_utf8_lossy(&key), String::from_utf8_lossy(&plain));
                }
                Ok(plain) => println!("{} (hex) = {}", String::from_utf8_lossy(&key), hex::encode(plain)),
                Err(e) => log::warn!("could not unwrap key-store row {}: {e}", String::from_utf8_lossy(&key)),
            }
        }
    }

    store
        .read_key(b"\x01ArchiveDataKey")
        .map_err(|e| format!("failed to read ArchiveDataKey from ADB: {e}").into())
}

fn prompt_password() -> io::Result<String> {
    eprint!("Archive password: ");
    io::stderr().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_owned())
}

fn parse_at_time(s: &str) -> Result<i64, Box<dyn std::error::Error>> {
    let parsed = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")?;
    Ok(parsed.and_utc().timestamp_millis())
}

fn run_list(
    archive: &BackupArchive,
    match_mode: FilenameMatchMode,
    at_ms: Option<i64>,
    include_deleted: bool,
    list_all: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    for info in archive.iter_files(match_mode)? {
        let info = info?;
        let revisions = archive.file_history_with_resolved_blocks(&info.entry)?;

        if list_all {
            // list-all prints every revision unconditionally; --include-deleted
            // has no effect here (there's no "latest" to gate).
            for (version, _) in &revisions {
                print_revision(&info.path, version);
            }
        } else if let Some((version, _)) = BackupArchive::select_list_revision(&revisions, at_ms, include_deleted) {
            print_revision(&info.path, version);
        }
    }
    Ok(())
}

fn print_revision(path: &str, version: &c42arc::ArchivedFileVersion) {
    let checksum = if version.source.is_deleted() {
        "X".to_owned()
    } else {
        hex::encode(version.source.source_checksum)
    };
    println!("{}\t{}\t{}", version.source.timestamp / 1000, checksum, path);
}

fn run_restore(
    archive: &BackupArchive,
    match_mode: FilenameMatchMode,
    at_ms: Option<i64>,
    include_deleted: bool,
    dest_root: &std::path::Path,
    dry_run: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut had_failure = false;

    for info in archive.iter_files(match_mode)? {
        let info = info?;
        let revisions = archive.file_history_with_resolved_blocks(&info.entry)?;
        let Some((version, blocks)) = BackupArchive::select_restore_revision(&revisions, at_ms, include_deleted) else {
            continue;
        };

        match archive.restore_revision(version, blocks) {
            Ok(restored) => {
                println!("{}", info.path);
                if !dry_run {
                    let dest_path = dest_root.join(info.path.trim_start_matches('/'));
                    c42arc::restore::apply_to_filesystem(
                        version.source.file_type,
                        &dest_path,
                        Some(restored),
                        version.source.source_last_modified,
                    )?;
                }
            }
            Err(e) => {
                had_failure = true;
                eprintln!("Error: failures occurred while restoring '{}': {e}", info.path);
            }
        }
    }

    if had_failure {
        return Err("one or more files failed to restore".into());
    }
    Ok(())
}
