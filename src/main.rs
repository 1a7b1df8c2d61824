//! `pkictl` - operator console for a ca-hierarchy PKI.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use ca_hierarchy::config::HierarchyConfig;
use ca_hierarchy::error::PkiError;
use ca_hierarchy::hierarchy::{HierarchyManager, HierarchyState};
use ca_hierarchy::issuance::{CertificateRequest, IssuanceEngine, IssueOutcome};
use ca_hierarchy::ledger::{EntryStatus, Serial};
use ca_hierarchy::operator::{Confirmation, Operator, PassphraseStage};
use ca_hierarchy::policy::{CaRole, PrincipalClass, ServerCa};
use ca_hierarchy::provider::RustCryptoProvider;
use ca_hierarchy::vault::{Passphrase, PassphraseVault, VaultWipe};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pkictl")]
#[command(about = "Set up and operate a root CA with its intermediate CAs")]
struct Cli {
    /// Hierarchy configuration file (TOML)
    #[arg(long, short, default_value = "pki.toml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Clone)]
enum Commands {
    /// Create the root CA and all intermediate CAs
    Setup {
        /// Offer to destroy an existing or partial hierarchy first
        #[arg(long)]
        recreate: bool,
    },
    /// Issue a server, user or device certificate
    Issue(IssueArgs),
    /// Mark a serial revoked in a CA's ledger
    Revoke { ca: CaRole, serial: u64 },
    /// Show ledger entries, for one CA or all of them
    List { ca: Option<CaRole> },
    /// Show the hierarchy state
    Status,
    /// Interactive session; passphrases stay cached until `exit`
    Shell,
}

#[derive(Args, Clone)]
struct IssueArgs {
    /// server, user or device
    class: PrincipalClass,
    common_name: String,
    /// Additional DNS names (server certificates only)
    alt_names: Vec<String>,
    #[arg(long)]
    ou: Option<String>,
    #[arg(long)]
    email: Option<String>,
    /// Server CA to issue from: domain or generic
    #[arg(long, default_value = "domain")]
    server_ca: ServerCa,
}

/// One line typed into the shell.
#[derive(Parser)]
#[command(no_binary_name = true, name = "pki")]
struct ShellLine {
    #[command(subcommand)]
    command: Commands,
}

/// Prompts on the controlling terminal.
struct TerminalOperator {
    allow_destroy: bool,
}

impl Operator for TerminalOperator {
    fn passphrase(&mut self, ca: CaRole, stage: PassphraseStage) -> ca_hierarchy::error::Result<Passphrase> {
        let prompt = match stage {
            PassphraseStage::Enter => format!("New passphrase for the {ca} CA key: "),
            PassphraseStage::Confirm => format!("Repeat passphrase for the {ca} CA key: "),
            PassphraseStage::Unlock => format!("Passphrase for the {ca} CA key: "),
        };
        let secret = rpassword::prompt_password(prompt)
            .map_err(|e| PkiError::InvalidInput(format!("cannot read passphrase: {e}")))?;
        Ok(Passphrase::new(secret))
    }

    fn confirm(&mut self, confirmation: &Confirmation) -> bool {
        let question = match confirmation {
            Confirmation::OverwriteBundle { artifact } => {
                format!("A certificate named '{artifact}' already exists. Overwrite it? [y/N] ")
            }
            Confirmation::DestroyHierarchy => {
                if !self.allow_destroy {
                    eprintln!("An existing CA hierarchy was found; rerun with --recreate to replace it.");
                    return false;
                }
                "Destroy the existing CA hierarchy and all issued certificates? [y/N] ".to_string()
            }
        };
        ask_yes_no(&question).unwrap_or(false)
    }
}

fn ask_yes_no(question: &str) -> io::Result<bool> {
    print!("{question}");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

struct Session {
    manager: HierarchyManager<RustCryptoProvider>,
    vault: PassphraseVault,
}

impl Session {
    fn run(&mut self, command: Commands) -> Result<()> {
        match command {
            Commands::Setup { recreate } => self.setup(recreate),
            Commands::Issue(args) => self.issue(args),
            Commands::Revoke { ca, serial } => self.revoke(ca, serial),
            Commands::List { ca } => self.list(ca),
            Commands::Status => self.status(),
            Commands::Shell => self.shell(),
        }
    }

    fn setup(&mut self, recreate: bool) -> Result<()> {
        let mut operator = TerminalOperator {
            allow_destroy: recreate,
        };
        let hierarchy = self
            .manager
            .setup(&mut operator, &mut self.vault)
            .context("CA hierarchy setup failed")?;
        for ca in hierarchy.authorities() {
            println!("{:<15} {}", ca.role(), ca.paths().cert_file().display());
        }
        Ok(())
    }

    fn issue(&mut self, args: IssueArgs) -> Result<()> {
        let hierarchy = self.manager.load()?;
        let request = CertificateRequest::builder()
            .class(args.class)
            .server_ca(args.server_ca)
            .common_name(args.common_name)
            .maybe_organizational_unit(args.ou)
            .maybe_email(args.email)
            .alt_names(args.alt_names)
            .build();
        let mut operator = TerminalOperator {
            allow_destroy: false,
        };
        let outcome = IssuanceEngine::new(&self.manager, &hierarchy).issue(
            &request,
            &mut operator,
            &mut self.vault,
        )?;
        match outcome {
            IssueOutcome::Issued(bundle) => {
                println!("Issued serial {} from the {} CA", bundle.serial, bundle.ca);
                for path in bundle.files.all() {
                    println!("  {}", path.display());
                }
            }
            IssueOutcome::Declined { artifact } => {
                println!("Kept the existing certificate '{artifact}'");
            }
        }
        Ok(())
    }

    fn revoke(&self, ca: CaRole, serial: u64) -> Result<()> {
        let hierarchy = self.manager.load()?;
        IssuanceEngine::new(&self.manager, &hierarchy).revoke(ca, Serial::new(serial))?;
        println!("Serial {serial} revoked in the {ca} ledger");
        Ok(())
    }

    fn list(&self, only: Option<CaRole>) -> Result<()> {
        let hierarchy = self.manager.load()?;
        for ca in hierarchy.authorities() {
            if only.is_some_and(|role| role != ca.role()) {
                continue;
            }
            println!("{} ({}), next serial {}", ca.role(), ca.name(), ca.ledger().next_serial());
            for entry in ca.ledger().entries() {
                let status = match entry.status {
                    EntryStatus::Valid => "valid",
                    EntryStatus::Revoked => "revoked",
                };
                println!(
                    "  {:>8}  {:<7}  expires {}  {}",
                    entry.serial,
                    status,
                    entry.expires_at.date(),
                    entry.subject
                );
            }
        }
        Ok(())
    }

    fn status(&self) -> Result<()> {
        let state = self.manager.state();
        println!(
            "CA hierarchy at {}: {state}",
            self.manager.config().base_dir.display()
        );
        if state == HierarchyState::Complete {
            let hierarchy = self.manager.load()?;
            for ca in hierarchy.authorities() {
                let validity = ca.certificate().validity();
                println!(
                    "  {:<15} {:<40} valid until {}, {} issued",
                    ca.role(),
                    ca.name(),
                    validity.not_after.date(),
                    ca.ledger().entries().len()
                );
            }
        }
        println!("  cached passphrases: {}", self.vault.len());
        Ok(())
    }

    fn shell(&mut self) -> Result<()> {
        println!("pkictl shell. Commands: setup, issue, revoke, list, status, exit");
        let stdin = io::stdin();
        loop {
            print!("pki> ");
            io::stdout().flush()?;
            let mut line = String::new();
            if stdin.lock().read_line(&mut line)? == 0 {
                break;
            }
            let words: Vec<&str> = line.split_whitespace().collect();
            match words.first() {
                None => continue,
                Some(&"exit") | Some(&"quit") => break,
                _ => {}
            }
            let command = match ShellLine::try_parse_from(words) {
                Ok(parsed) => parsed.command,
                Err(e) => {
                    let _ = e.print();
                    continue;
                }
            };
            if matches!(command, Commands::Shell) {
                eprintln!("already in a shell");
                continue;
            }
            if let Err(e) = self.run(command) {
                eprintln!("error: {e:#}");
            }
        }
        self.vault.clear_all();
        println!("Passphrases cleared.");
        Ok(())
    }
}

/// Clears the vault and exits when the operator hits Ctrl-C.
fn watch_interrupt(vault: VaultWipe) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("cannot start signal runtime")?;
    std::thread::spawn(move || {
        runtime.block_on(async {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            vault.wipe();
            eprintln!("\ninterrupted, passphrases cleared");
            std::process::exit(130);
        });
    });
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = HierarchyConfig::load(&cli.config)
        .with_context(|| format!("cannot load {}", cli.config.display()))?;
    let provider = RustCryptoProvider::new(config.kdf_iterations);
    let mut session = Session {
        manager: HierarchyManager::new(config, provider),
        vault: PassphraseVault::new(),
    };
    watch_interrupt(session.vault.wipe_handle())?;

    let result = session.run(cli.command);
    session.vault.clear_all();
    result
}
