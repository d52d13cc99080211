mod lock;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::error;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use vpcnet::{SubnetKind, VpcError, VpcStore};

const EXIT_USAGE: u8 = 1;
const EXIT_HOST: u8 = 2;
const EXIT_STORE: u8 = 3;

const LOG_FILE: &str = "vpcctl.log";

#[derive(Parser)]
#[command(name = "vpcctl", version, about = "Host-local VPC control plane")]
struct Cli {
    /// Emit structured JSON on stdout instead of human-readable text
    #[arg(long, global = true)]
    json: bool,

    /// Directory holding per-VPC state files
    #[arg(long, global = true, default_value = "./state")]
    state_dir: PathBuf,

    /// Directory for the append-mode log file
    #[arg(long, global = true, default_value = "./logs")]
    log_dir: PathBuf,

    /// Seconds to wait for a concurrent invocation to release its lock
    #[arg(long, global = true, default_value_t = 30)]
    lock_timeout: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a VPC: bridge with gateway address, forwarding enabled
    CreateVpc(CreateVpcArgs),
    /// Add a public or private subnet namespace to a VPC
    AddSubnet(AddSubnetArgs),
    /// Launch a command inside a subnet's namespace and record it
    DeployApp(DeployAppArgs),
    /// Compile a policy file into per-namespace firewall rules
    ApplyPolicy(ApplyPolicyArgs),
    /// Connect two VPCs' bridges with an allowlist of routed CIDRs
    Peer(PeerArgs),
    /// Show one VPC's record
    Inspect(InspectArgs),
    /// List all VPC records
    ListVpcs,
    /// Delete a VPC and everything it owns
    DeleteVpc(DeleteVpcArgs),
    /// Delete all VPCs, then sweep orphaned kernel objects
    TeardownAll,
}

#[derive(Args)]
struct CreateVpcArgs {
    /// VPC name: 1-32 chars matching [a-z0-9][a-z0-9-]*
    #[arg(long)]
    name: String,
    /// IPv4 address block, /8 to /28 (e.g. 10.20.0.0/16)
    #[arg(long)]
    cidr: String,
    /// Upstream interface public-subnet NAT egresses through
    #[arg(long)]
    internet_iface: String,
}

#[derive(Args)]
struct AddSubnetArgs {
    #[arg(long)]
    vpc: String,
    /// Subnet name, unique within the VPC
    #[arg(long)]
    name: String,
    /// IPv4 block strictly inside the VPC block
    #[arg(long)]
    cidr: String,
    /// public subnets get a masquerade rule out the upstream interface
    #[arg(long = "type", value_enum)]
    kind: SubnetTypeArg,
}

#[derive(Clone, Copy, ValueEnum)]
enum SubnetTypeArg {
    Public,
    Private,
}

impl From<SubnetTypeArg> for SubnetKind {
    fn from(value: SubnetTypeArg) -> Self {
        match value {
            SubnetTypeArg::Public => SubnetKind::Public,
            SubnetTypeArg::Private => SubnetKind::Private,
        }
    }
}

#[derive(Args)]
struct DeployAppArgs {
    #[arg(long)]
    vpc: String,
    #[arg(long)]
    subnet: String,
    #[arg(long)]
    name: String,
    /// Shell command line to run inside the namespace
    #[arg(long)]
    cmd: String,
}

#[derive(Args)]
struct ApplyPolicyArgs {
    /// JSON array of {subnet, ingress, egress} entries
    #[arg(long)]
    policy_file: PathBuf,
}

#[derive(Args)]
struct PeerArgs {
    #[arg(long)]
    vpc_a: String,
    #[arg(long)]
    vpc_b: String,
    /// Comma-separated CIDRs routed across the peering
    #[arg(long, value_delimiter = ',', required = true)]
    allowed_cidrs: Vec<String>,
}

#[derive(Args)]
struct InspectArgs {
    #[arg(long)]
    vpc: String,
}

#[derive(Args)]
struct DeleteVpcArgs {
    #[arg(long)]
    name: String,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Vpc(#[from] VpcError),

    #[error(transparent)]
    Lock(#[from] lock::LockError),

    #[error("{0}")]
    Preflight(String),

    #[error("cannot read policy file {path}: {detail}")]
    PolicyFile { path: String, detail: String },

    #[error("encode output: {0}")]
    Output(#[from] serde_json::Error),

    #[error("state store was unreadable; orphan sweep still ran")]
    StoreUnreadable,
}

fn exit_code(e: &CliError) -> u8 {
    match e {
        CliError::Vpc(inner) if inner.is_user_error() => EXIT_USAGE,
        CliError::Vpc(inner) if inner.is_store_error() => EXIT_STORE,
        CliError::Vpc(_) => EXIT_HOST,
        CliError::Lock(_) | CliError::Preflight(_) => EXIT_HOST,
        CliError::PolicyFile { .. } => EXIT_USAGE,
        CliError::Output(_) | CliError::StoreUnreadable => EXIT_STORE,
    }
}

fn hint(e: &CliError) -> Option<&'static str> {
    match e {
        CliError::Vpc(VpcError::Host(_)) => {
            Some("hint: run 'vpcctl teardown-all' to remove partially created objects")
        }
        CliError::Lock(lock::LockError::Busy(_)) => {
            Some("hint: another vpcctl invocation is running; retry when it finishes")
        }
        CliError::Preflight(_) => {
            Some("hint: vpcctl needs root and the ip/iptables/iptables-save/sysctl tools")
        }
        _ => None,
    }
}

/// Mutating verbs need root and the host network tools.
fn preflight() -> Result<(), CliError> {
    if !nix::unistd::geteuid().is_root() {
        return Err(CliError::Preflight(
            "vpcctl must run as root to manage namespaces, bridges, and nat rules".to_string(),
        ));
    }
    for tool in ["ip", "iptables", "iptables-save", "sysctl"] {
        if which::which(tool).is_err() {
            return Err(CliError::Preflight(format!("required command not found: {tool}")));
        }
    }
    Ok(())
}

fn validate_name(name: &str) -> Result<(), CliError> {
    vpcnet::name::validate(name).map_err(|e| CliError::Vpc(e.into()))
}

/// Log to stderr and, when the log directory is writable, to an
/// append-mode file inside it.
fn init_logging(log_dir: &std::path::Path) {
    let file = std::fs::create_dir_all(log_dir).and_then(|()| {
        std::fs::File::options()
            .create(true)
            .append(true)
            .open(log_dir.join(LOG_FILE))
    });
    match file {
        Ok(file) => {
            tracing_subscriber::fmt()
                .with_ansi(false)
                .with_writer(std::io::stderr.and(Arc::new(file)))
                .init();
        }
        Err(e) => {
            tracing_subscriber::fmt().with_ansi(false).with_writer(std::io::stderr).init();
            tracing::warn!(error = %e, "log file unavailable, logging to stderr only");
        }
    }
}

async fn dispatch(cli: Cli) -> Result<String, CliError> {
    let store = VpcStore::new(cli.state_dir.clone());
    let locks = lock::LockPaths::new(&cli.state_dir);
    let timeout = Duration::from_secs(cli.lock_timeout);
    let json = cli.json;

    match cli.command {
        Command::CreateVpc(args) => {
            preflight()?;
            validate_name(&args.name)?;
            let _global = lock::acquire_shared(locks.global(), timeout).await?;
            let _vpc = lock::acquire_exclusive(locks.vpc(&args.name), timeout).await?;
            let record =
                vpcnet::vpc::create(&store, &args.name, &args.cidr, &args.internet_iface).await?;
            Ok(output::created_vpc(&record, json)?)
        }
        Command::AddSubnet(args) => {
            preflight()?;
            validate_name(&args.vpc)?;
            let _global = lock::acquire_shared(locks.global(), timeout).await?;
            let _vpc = lock::acquire_exclusive(locks.vpc(&args.vpc), timeout).await?;
            let subnet = vpcnet::subnet::add(
                &store,
                &args.vpc,
                &args.name,
                &args.cidr,
                args.kind.into(),
            )
            .await?;
            Ok(output::subnet_added(&args.vpc, &subnet, json)?)
        }
        Command::DeployApp(args) => {
            preflight()?;
            validate_name(&args.vpc)?;
            let _global = lock::acquire_shared(locks.global(), timeout).await?;
            let _vpc = lock::acquire_exclusive(locks.vpc(&args.vpc), timeout).await?;
            let app =
                vpcnet::app::deploy(&store, &args.vpc, &args.subnet, &args.name, &args.cmd)
                    .await?;
            Ok(output::app_deployed(&args.vpc, &args.subnet, &app, json)?)
        }
        Command::ApplyPolicy(args) => {
            preflight()?;
            let content = tokio::fs::read_to_string(&args.policy_file).await.map_err(|e| {
                CliError::PolicyFile {
                    path: args.policy_file.display().to_string(),
                    detail: e.to_string(),
                }
            })?;
            let entries = vpcnet::policy::parse(&content)?;
            let _global = lock::acquire_exclusive(locks.global(), timeout).await?;
            let outcome = vpcnet::policy::apply(&store, &entries).await?;
            Ok(output::policy_applied(&outcome, json)?)
        }
        Command::Peer(args) => {
            preflight()?;
            let _global = lock::acquire_exclusive(locks.global(), timeout).await?;
            let peering =
                vpcnet::peering::establish(&store, &args.vpc_a, &args.vpc_b, &args.allowed_cidrs)
                    .await?;
            Ok(output::peered(&peering, json)?)
        }
        Command::Inspect(args) => {
            let record = vpcnet::vpc::inspect(&store, &args.vpc).await?;
            Ok(output::inspect(&record, json)?)
        }
        Command::ListVpcs => {
            let records = vpcnet::vpc::list(&store).await?;
            Ok(output::vpc_list(&records, json)?)
        }
        Command::DeleteVpc(args) => {
            preflight()?;
            // Deletion unwires peerings, so it touches other VPCs' records.
            let _global = lock::acquire_exclusive(locks.global(), timeout).await?;
            vpcnet::vpc::delete(&store, &args.name).await?;
            Ok(output::deleted(&args.name, json)?)
        }
        Command::TeardownAll => {
            preflight()?;
            let _global = lock::acquire_exclusive(locks.global(), timeout).await?;
            let report = vpcnet::teardown::run(&store).await;
            let text = output::teardown(&report, json)?;
            if report.store_unreadable {
                println!("{text}");
                return Err(CliError::StoreUnreadable);
            }
            Ok(text)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // Help and version print on stdout and exit 0; usage errors are
            // validation failures.
            let code = if e.use_stderr() { EXIT_USAGE } else { 0 };
            let _ = e.print();
            return ExitCode::from(code);
        }
    };

    init_logging(&cli.log_dir);

    match dispatch(cli).await {
        Ok(text) => {
            println!("{text}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "operation failed");
            if let Some(hint) = hint(&e) {
                eprintln!("{hint}");
            }
            ExitCode::from(exit_code(&e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn create_vpc_args_parse() {
        let cli = Cli::try_parse_from([
            "vpcctl",
            "create-vpc",
            "--name",
            "testvpc",
            "--cidr",
            "10.20.0.0/16",
            "--internet-iface",
            "eth0",
        ])
        .unwrap();
        match cli.command {
            Command::CreateVpc(args) => {
                assert_eq!(args.name, "testvpc");
                assert_eq!(args.cidr, "10.20.0.0/16");
                assert_eq!(args.internet_iface, "eth0");
            }
            _ => panic!("wrong verb"),
        }
    }

    #[test]
    fn json_flag_is_accepted_before_and_after_the_verb() {
        let before = Cli::try_parse_from(["vpcctl", "--json", "list-vpcs"]).unwrap();
        assert!(before.json);
        let after = Cli::try_parse_from(["vpcctl", "list-vpcs", "--json"]).unwrap();
        assert!(after.json);
    }

    #[test]
    fn subnet_type_parses_public_and_private() {
        let cli = Cli::try_parse_from([
            "vpcctl",
            "add-subnet",
            "--vpc",
            "testvpc",
            "--name",
            "private",
            "--cidr",
            "10.20.2.0/24",
            "--type",
            "private",
        ])
        .unwrap();
        match cli.command {
            Command::AddSubnet(args) => {
                assert!(matches!(SubnetKind::from(args.kind), SubnetKind::Private));
            }
            _ => panic!("wrong verb"),
        }
    }

    #[test]
    fn allowed_cidrs_split_on_commas() {
        let cli = Cli::try_parse_from([
            "vpcctl",
            "peer",
            "--vpc-a",
            "testvpc",
            "--vpc-b",
            "othervpc",
            "--allowed-cidrs",
            "10.20.0.0/16,10.30.0.0/16",
        ])
        .unwrap();
        match cli.command {
            Command::Peer(args) => {
                assert_eq!(args.allowed_cidrs, vec!["10.20.0.0/16", "10.30.0.0/16"]);
            }
            _ => panic!("wrong verb"),
        }
    }

    #[test]
    fn missing_required_option_is_a_parse_error() {
        assert!(Cli::try_parse_from(["vpcctl", "create-vpc", "--name", "x"]).is_err());
    }

    #[test]
    fn unknown_verb_is_a_parse_error() {
        assert!(Cli::try_parse_from(["vpcctl", "destroy-everything"]).is_err());
    }

    #[test]
    fn exit_codes_follow_error_taxonomy() {
        let user = CliError::Vpc(VpcError::VpcNotFound("x".to_string()));
        assert_eq!(exit_code(&user), EXIT_USAGE);

        let addr = CliError::Vpc(VpcError::Addr(vpcnet::addr::AddrError::Invalid(
            "bogus".to_string(),
        )));
        assert_eq!(exit_code(&addr), EXIT_USAGE);

        let busy = CliError::Lock(lock::LockError::Busy("state/.vpcctl.lock".to_string()));
        assert_eq!(exit_code(&busy), EXIT_HOST);

        let policy = CliError::PolicyFile {
            path: "p.json".to_string(),
            detail: "missing".to_string(),
        };
        assert_eq!(exit_code(&policy), EXIT_USAGE);

        assert_eq!(exit_code(&CliError::StoreUnreadable), EXIT_STORE);
    }

    #[test]
    fn host_errors_carry_a_teardown_hint() {
        let host_err = CliError::Vpc(VpcError::Host(vpcnet::HostError::Other {
            command: "ip link add".to_string(),
            detail: "boom".to_string(),
        }));
        assert!(hint(&host_err).is_some_and(|h| h.contains("teardown-all")));

        let busy = CliError::Lock(lock::LockError::Busy("l".to_string()));
        assert!(hint(&busy).is_some());

        let user = CliError::Vpc(VpcError::VpcNotFound("x".to_string()));
        assert!(hint(&user).is_none());
    }
}
