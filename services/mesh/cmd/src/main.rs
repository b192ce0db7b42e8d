//! Bluetooth Mesh provisioner command line.
//!
//! Manages provisioners and network keys of one mesh network, provisions
//! devices and decodes model messages.

use anyhow::{bail, Context};
use clap::{Args as ClapArgs, Parser, Subcommand};
use mesh_models::MessageCatalog;
use mesh_registry::AddressKeyAllocator;
use mesh_security::{KeyBytes, MeshSecurity, NetworkKey};
use mesh_session::{
    ChannelBearer, ManagerConfig, ProvisioningManager, ProvisioningTimeouts, SimulatedDevice,
};
use mesh_storage::{
    decode_snapshot, encode_snapshot, AllocatedRange, Provisioner, RangeKind, Storage, StorageMode,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod config;
mod logging;

use config::MeshConfig;
use logging::MeshLogFormatter;

/// Bluetooth Mesh provisioner
#[derive(Parser, Debug)]
#[command(name = "btmesh", version, about = "Bluetooth Mesh provisioner")]
struct Args {
    /// Configuration file path
    #[arg(long, default_value = "btmesh.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Storage mode: memory, file
    #[arg(long)]
    storage_mode: Option<String>,

    /// Data directory for file storage
    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage provisioners
    #[command(subcommand)]
    Provisioner(ProvisionerCommand),

    /// Manage network keys
    #[command(subcommand)]
    Netkey(NetkeyCommand),

    /// Provision a simulated device over an in-process bearer
    Provision(ProvisionArgs),

    /// Decode a hex-encoded access PDU through the sensor catalog
    Decode {
        /// Access PDU, e.g. 57420002
        hex: String,
    },
}

#[derive(Subcommand, Debug)]
enum ProvisionerCommand {
    /// Add a provisioner
    Add {
        /// Display name
        #[arg(long)]
        name: String,
        /// Unicast address of the provisioner itself
        #[arg(long, value_parser = parse_address)]
        address: Option<u16>,
        /// Range as kind:low-high, e.g. unicast:0x0001-0x00FF (repeatable)
        #[arg(long = "range", value_parser = parse_range)]
        ranges: Vec<RangeArg>,
        /// Default TTL
        #[arg(long)]
        ttl: Option<u8>,
    },
    /// List provisioners and their ranges
    List,
    /// Edit a provisioner
    Edit(EditArgs),
    /// Remove a provisioner
    Remove {
        /// Provisioner id
        id: Uuid,
    },
    /// Write a provisioner snapshot to a file
    Export {
        /// Provisioner id
        id: Uuid,
        /// Output file
        #[arg(long, short)]
        output: PathBuf,
    },
    /// Add a provisioner from a snapshot file
    Import {
        /// Snapshot file written by `export`
        input: PathBuf,
    },
}

#[derive(ClapArgs, Debug)]
struct EditArgs {
    /// Provisioner id
    id: Uuid,
    /// New name
    #[arg(long)]
    name: Option<String>,
    /// New default TTL
    #[arg(long)]
    ttl: Option<u8>,
    /// New unicast address
    #[arg(long, value_parser = parse_address, conflicts_with = "clear_address")]
    address: Option<u16>,
    /// Remove the provisioner's unicast address
    #[arg(long)]
    clear_address: bool,
    /// Allocate a range, kind:low-high (repeatable)
    #[arg(long = "add-range", value_parser = parse_range)]
    add_ranges: Vec<RangeArg>,
    /// Release a range, kind:low-high (repeatable)
    #[arg(long = "remove-range", value_parser = parse_range)]
    remove_ranges: Vec<RangeArg>,
    /// Make this the selected provisioner
    #[arg(long)]
    select: bool,
}

#[derive(Subcommand, Debug)]
enum NetkeyCommand {
    /// Generate and store a random network key
    Generate {
        /// Global key index
        #[arg(long, default_value_t = 0)]
        index: u16,
        /// Display name
        #[arg(long, default_value = "Primary Network Key")]
        name: String,
    },
    /// List stored network keys
    List,
}

#[derive(ClapArgs, Debug)]
struct ProvisionArgs {
    /// Provisioner to act as; defaults to the selected one
    #[arg(long)]
    provisioner: Option<Uuid>,
    /// Device UUID; random when omitted
    #[arg(long)]
    device_uuid: Option<Uuid>,
    /// Number of elements on the simulated device
    #[arg(long, default_value_t = 1)]
    elements: u8,
    /// Static OOB value shared with the device (32 hex digits)
    #[arg(long)]
    static_oob: Option<String>,
    /// Per-step timeout, overrides the configuration
    #[arg(long)]
    step_timeout: Option<humantime::Duration>,
}

#[derive(Debug, Clone, Copy)]
struct RangeArg {
    kind: RangeKind,
    range: AllocatedRange,
}

fn parse_address(s: &str) -> Result<u16, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse::<u16>(),
    };
    parsed.map_err(|e| format!("invalid address {:?}: {}", s, e))
}

fn parse_range(s: &str) -> Result<RangeArg, String> {
    let (kind, bounds) = s
        .split_once(':')
        .ok_or_else(|| format!("expected kind:low-high, got {:?}", s))?;
    let kind = match kind {
        "unicast" => RangeKind::Unicast,
        "group" => RangeKind::Group,
        "scene" => RangeKind::Scene,
        other => return Err(format!("unknown range kind {:?}", other)),
    };
    let (low, high) = bounds
        .split_once('-')
        .ok_or_else(|| format!("expected low-high, got {:?}", bounds))?;
    Ok(RangeArg {
        kind,
        range: AllocatedRange::new(parse_address(low)?, parse_address(high)?),
    })
}

/// Everything a command needs
struct App {
    config: MeshConfig,
    storage: Storage,
    allocator: Arc<AddressKeyAllocator>,
    security: Arc<MeshSecurity>,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::new("warn")
        .add_directive(format!("btmesh={}", args.log_level).parse()?)
        .add_directive(format!("mesh_registry={}", args.log_level).parse()?)
        .add_directive(format!("mesh_session={}", args.log_level).parse()?)
        .add_directive(format!("mesh_security={}", args.log_level).parse()?)
        .add_directive(format!("mesh_storage={}", args.log_level).parse()?)
        .add_directive(format!("mesh_models={}", args.log_level).parse()?)
        .add_directive(format!("mesh_wire={}", args.log_level).parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .event_format(MeshLogFormatter::new("btmesh"))
        .init();

    let mut config = MeshConfig::load_from_file(&args.config)?;
    if let Some(mode) = args.storage_mode {
        config.storage_mode = mode;
    }
    if let Some(dir) = args.data_dir {
        config.data_dir = dir;
    }

    if let Command::Decode { hex } = &args.command {
        return decode(hex);
    }

    let ctx = open(config).await?;
    match args.command {
        Command::Provisioner(cmd) => provisioner(&ctx, cmd).await,
        Command::Netkey(cmd) => netkey(&ctx, cmd).await,
        Command::Provision(provision_args) => provision(&ctx, provision_args).await,
        Command::Decode { .. } => Ok(()),
    }
}

/// Resolve the mesh identity, open storage and hydrate the registry and key ring
async fn open(config: MeshConfig) -> anyhow::Result<App> {
    let mode = config.storage_mode()?;
    let mesh_uuid = match (config.mesh_uuid, &mode) {
        (Some(uuid), _) => uuid,
        (None, StorageMode::File { data_dir }) => mesh_uuid_in(data_dir)?,
        (None, StorageMode::InMemory) => Uuid::new_v4(),
    };

    let storage = Storage::from_mode(mode).await?;
    let allocator = Arc::new(AddressKeyAllocator::new(mesh_uuid, storage.clone()));
    allocator.load_provisioners().await?;

    let security = Arc::new(MeshSecurity::new());
    for key in storage.network_keys.load_network_keys(mesh_uuid).await? {
        security.install_network_key(key);
    }

    info!("Opened mesh {}", mesh_uuid);
    Ok(App {
        config,
        storage,
        allocator,
        security,
    })
}

/// Mesh UUID kept next to the file store, created on first use
fn mesh_uuid_in(data_dir: &Path) -> anyhow::Result<Uuid> {
    let path = data_dir.join("mesh_uuid");
    match std::fs::read_to_string(&path) {
        Ok(content) => content
            .trim()
            .parse()
            .with_context(|| format!("invalid mesh uuid in {:?}", path)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            std::fs::create_dir_all(data_dir)?;
            let uuid = Uuid::new_v4();
            std::fs::write(&path, uuid.to_string())?;
            component_info!("config", "Created mesh {}", uuid);
            Ok(uuid)
        }
        Err(e) => Err(e).with_context(|| format!("reading {:?}", path)),
    }
}

async fn provisioner(ctx: &App, cmd: ProvisionerCommand) -> anyhow::Result<()> {
    let allocator = &ctx.allocator;
    match cmd {
        ProvisionerCommand::Add {
            name,
            address,
            ranges,
            ttl,
        } => {
            let mut provisioner = Provisioner::new(allocator.mesh_uuid(), name);
            for arg in ranges {
                provisioner.insert_range(arg.kind, arg.range);
            }
            if let Some(address) = address {
                provisioner = provisioner.with_address(address);
            }
            if let Some(ttl) = ttl {
                provisioner.global_ttl = ttl;
            }
            let id = provisioner.id;
            allocator.add_provisioner(provisioner).await?;
            println!("{}", id);
        }
        ProvisionerCommand::List => {
            for p in allocator.provisioners().await {
                let address = p
                    .unicast_address
                    .map(|a| format!("0x{:04X}", a))
                    .unwrap_or_else(|| "-".to_string());
                let selected = if p.last_selected { "*" } else { " " };
                println!(
                    "{} {} {:<20} address={} ttl={} seq={}",
                    selected, p.id, p.name, address, p.global_ttl, p.sequence_number
                );
                for kind in [RangeKind::Unicast, RangeKind::Group, RangeKind::Scene] {
                    for range in p.ranges(kind) {
                        println!("      {:<7} {}", kind.to_string(), range);
                    }
                }
            }
            for node in allocator.nodes() {
                println!(
                    "  node {} {} elements={}",
                    node.device_uuid,
                    node.addresses(),
                    node.element_count
                );
            }
        }
        ProvisionerCommand::Edit(edit) => {
            let id = edit.id;
            if let Some(name) = edit.name {
                allocator.rename(id, &name).await?;
            }
            if let Some(ttl) = edit.ttl {
                allocator.set_ttl(id, ttl).await?;
            }
            for arg in edit.remove_ranges {
                allocator.remove_range(id, arg.range, arg.kind).await?;
            }
            for arg in edit.add_ranges {
                allocator.allocate_range(id, arg.range, arg.kind).await?;
            }
            if edit.clear_address {
                allocator.set_provisioner_address(id, None).await?;
            } else if let Some(address) = edit.address {
                allocator.set_provisioner_address(id, Some(address)).await?;
            }
            if edit.select {
                allocator.select_provisioner(id).await?;
            }
            component_info!("registry", "Updated provisioner {}", id);
        }
        ProvisionerCommand::Remove { id } => {
            allocator.remove_provisioner(id).await?;
            component_info!("registry", "Removed provisioner {}", id);
        }
        ProvisionerCommand::Export { id, output } => {
            let snapshot = encode_snapshot(&allocator.provisioner(id).await?)?;
            std::fs::write(&output, &snapshot)
                .with_context(|| format!("writing snapshot {:?}", output))?;
            component_info!(
                "registry",
                "Exported provisioner {} to {:?} ({} bytes)",
                id,
                output,
                snapshot.len()
            );
        }
        ProvisionerCommand::Import { input } => {
            let bytes = std::fs::read(&input)
                .with_context(|| format!("reading snapshot {:?}", input))?;
            let provisioner = decode_snapshot(&bytes)?;
            if provisioner.mesh_uuid != allocator.mesh_uuid() {
                bail!(
                    "snapshot belongs to mesh {}, not {}",
                    provisioner.mesh_uuid,
                    allocator.mesh_uuid()
                );
            }
            let id = provisioner.id;
            allocator.add_provisioner(provisioner).await?;
            component_info!("registry", "Imported provisioner {} from {:?}", id, input);
            println!("{}", id);
        }
    }
    Ok(())
}

async fn netkey(ctx: &App, cmd: NetkeyCommand) -> anyhow::Result<()> {
    let mesh_uuid = ctx.allocator.mesh_uuid();
    match cmd {
        NetkeyCommand::Generate { index, name } => {
            if ctx.security.network_key(index).is_some() {
                bail!("network key {} already exists", index);
            }
            let key = NetworkKey::generate(index, name)?;
            ctx.storage
                .network_keys
                .save_network_key(mesh_uuid, &key)
                .await?;
            ctx.security.install_network_key(key);
            component_info!("keys", "Generated network key {}", index);
        }
        NetkeyCommand::List => {
            for key in ctx.storage.network_keys.load_network_keys(mesh_uuid).await? {
                let nid = ctx
                    .security
                    .network_identity(key.index())
                    .map(|(nid, network_id)| format!("nid=0x{:02X} id={}", nid, hex::encode(network_id)))
                    .unwrap_or_default();
                println!(
                    "{:>4} {:<24} phase={:?} {}",
                    key.index(),
                    key.name(),
                    key.phase(),
                    nid
                );
            }
        }
    }
    Ok(())
}

async fn provision(ctx: &App, args: ProvisionArgs) -> anyhow::Result<()> {
    let provisioner_id = match args.provisioner {
        Some(id) => id,
        None => {
            let provisioners = ctx.allocator.provisioners().await;
            provisioners
                .iter()
                .find(|p| p.last_selected)
                .or_else(|| provisioners.first())
                .map(|p| p.id)
                .context("no provisioner; run `btmesh provisioner add` first")?
        }
    };

    let network_key_index = ctx.config.network_key_index;
    if ctx.security.network_key(network_key_index).is_none() {
        bail!(
            "network key {} not found; run `btmesh netkey generate` first",
            network_key_index
        );
    }

    let static_oob = args
        .static_oob
        .as_deref()
        .map(KeyBytes::from_hex)
        .transpose()?;
    let step = args
        .step_timeout
        .map(Into::into)
        .unwrap_or_else(|| ctx.config.provisioning_timeout());

    let manager = ProvisioningManager::new(
        ctx.allocator.clone(),
        ctx.security.clone(),
        ManagerConfig {
            network_key_index,
            iv_index: ctx.config.iv_index,
            attention_duration: ctx.config.attention_duration,
            require_static_oob: static_oob.is_some(),
            static_oob: static_oob.clone(),
            timeouts: ProvisioningTimeouts { step },
            ..ManagerConfig::default()
        },
    );

    let device_uuid = args.device_uuid.unwrap_or_else(Uuid::new_v4);
    let (mut near, mut far) = ChannelBearer::pair();
    let mut device = SimulatedDevice::new(device_uuid, args.elements);
    if let Some(value) = static_oob {
        device = device.with_static_oob(value);
    }
    let device_task = tokio::spawn(async move { device.run(&mut far).await });

    component_info!("provision", "Provisioning device {}", device_uuid);
    let provisioning = manager.provision(device_uuid, provisioner_id, &mut near);
    tokio::pin!(provisioning);
    let result = tokio::select! {
        result = &mut provisioning => result,
        _ = tokio::signal::ctrl_c() => {
            component_warn!("provision", "Interrupted, cancelling {}", device_uuid);
            manager.cancel(device_uuid);
            provisioning.await
        }
    };
    device_task.abort();

    let outcome = result?;
    component_info!(
        "provision",
        "Provisioned {} at 0x{:04X} with {} element(s)",
        outcome.device_uuid,
        outcome.unicast_address,
        outcome.element_count
    );
    println!(
        "{} 0x{:04X} elements={} net_key_index={}",
        outcome.device_uuid, outcome.unicast_address, outcome.element_count, outcome.network_key_index
    );
    Ok(())
}

fn decode(input: &str) -> anyhow::Result<()> {
    let bytes = hex::decode(input.trim()).context("access pdu must be hex")?;
    let catalog = MessageCatalog::sensor();
    let message = catalog.decode_bytes(&bytes)?;
    component_debug!("models", "Decoded {} byte access pdu", bytes.len());
    println!("{:#?}", message);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address() {
        assert_eq!(parse_address("0x00FF").unwrap(), 0x00FF);
        assert_eq!(parse_address("42").unwrap(), 42);
        assert!(parse_address("0xZZ").is_err());
    }

    #[test]
    fn test_parse_range() {
        let arg = parse_range("group:0xC000-0xC0FF").unwrap();
        assert_eq!(arg.kind, RangeKind::Group);
        assert_eq!(arg.range, AllocatedRange::new(0xC000, 0xC0FF));
        assert!(parse_range("unicast:0x0001").is_err());
        assert!(parse_range("mixed:1-2").is_err());
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let args = Args::try_parse_from([
            "btmesh",
            "provisioner",
            "add",
            "--name",
            "Phone",
            "--address",
            "0x0001",
            "--range",
            "unicast:0x0001-0x00FF",
        ])
        .unwrap();
        match args.command {
            Command::Provisioner(ProvisionerCommand::Add { name, ranges, .. }) => {
                assert_eq!(name, "Phone");
                assert_eq!(ranges.len(), 1);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_open_file_storage_keeps_mesh_uuid() {
        let dir = tempfile::tempdir().unwrap();
        let config = MeshConfig {
            data_dir: dir.path().to_path_buf(),
            ..MeshConfig::default()
        };
        let first = open(config.clone()).await.unwrap();
        let second = open(config).await.unwrap();
        assert_eq!(first.allocator.mesh_uuid(), second.allocator.mesh_uuid());
    }

    async fn memory_app() -> App {
        open(MeshConfig {
            storage_mode: "memory".to_string(),
            ..MeshConfig::default()
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_provisioner_export_import() {
        let ctx = memory_app().await;
        provisioner(
            &ctx,
            ProvisionerCommand::Add {
                name: "Tablet".to_string(),
                address: Some(0x0010),
                ranges: vec![
                    parse_range("unicast:0x0010-0x001F").unwrap(),
                    parse_range("scene:0x0001-0x0005").unwrap(),
                ],
                ttl: Some(7),
            },
        )
        .await
        .unwrap();
        let original = ctx.allocator.provisioners().await.remove(0);

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("tablet.snapshot");
        provisioner(
            &ctx,
            ProvisionerCommand::Export {
                id: original.id,
                output: file.clone(),
            },
        )
        .await
        .unwrap();
        provisioner(&ctx, ProvisionerCommand::Remove { id: original.id })
            .await
            .unwrap();
        assert!(ctx.allocator.provisioners().await.is_empty());

        provisioner(&ctx, ProvisionerCommand::Import { input: file.clone() })
            .await
            .unwrap();
        assert_eq!(ctx.allocator.provisioner(original.id).await.unwrap(), original);

        // A snapshot from another mesh is refused
        let other = memory_app().await;
        assert!(provisioner(&other, ProvisionerCommand::Import { input: file })
            .await
            .is_err());
        assert!(other.allocator.provisioners().await.is_empty());
    }

    #[tokio::test]
    async fn test_provision_loopback() {
        let ctx = open(MeshConfig {
            storage_mode: "memory".to_string(),
            ..MeshConfig::default()
        })
        .await
        .unwrap();

        netkey(
            &ctx,
            NetkeyCommand::Generate {
                index: 0,
                name: "Primary".to_string(),
            },
        )
        .await
        .unwrap();
        provisioner(
            &ctx,
            ProvisionerCommand::Add {
                name: "Phone".to_string(),
                address: Some(0x0001),
                ranges: vec![parse_range("unicast:0x0001-0x00FF").unwrap()],
                ttl: None,
            },
        )
        .await
        .unwrap();

        provision(
            &ctx,
            ProvisionArgs {
                provisioner: None,
                device_uuid: None,
                elements: 2,
                static_oob: None,
                step_timeout: None,
            },
        )
        .await
        .unwrap();

        let nodes = ctx.allocator.nodes();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].unicast_address, 0x0002);
        assert!(ctx.security.has_device_key(0x0002));
    }
}
