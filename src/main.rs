use std::thread;
use std::time::{Duration, Instant};

use hardware_devices::device::{DeviceId, DevicePath, Disk, Gpu, Network, Rapl, RaplChannel};
use hardware_devices::registry::DeviceRegistry;
use hardware_devices::system::{self, DeviceCandidate};
use hardware_devices::units::{format_bytes, format_link_speed, format_rate};
use hardware_devices::{DeviceKind, PluginContext, Settings};

/// Command-line arguments (parsed with lightweight lexopt)
#[derive(Debug, Default)]
struct Args {
    delay: Option<u64>,
    max_iterations: Option<u64>,
    list: bool,
    hidden: bool,
    add: Vec<String>,
    remove: Vec<String>,
    help: bool,
    version: bool,
    inefficient: bool,
}

fn parse_args() -> Result<Args, lexopt::Error> {
    use lexopt::prelude::*;

    let mut args = Args::default();
    let mut parser = lexopt::Parser::from_env();

    while let Some(arg) = parser.next()? {
        match arg {
            Short('d') | Long("delay") => {
                args.delay = Some(parser.value()?.parse()?);
            }
            Short('n') | Long("max-iterations") => {
                args.max_iterations = Some(parser.value()?.parse()?);
            }
            Short('l') | Long("list") => {
                args.list = true;
            }
            Long("hidden") => {
                args.hidden = true;
            }
            Long("add") => {
                args.add.push(parser.value()?.parse()?);
            }
            Long("remove") => {
                args.remove.push(parser.value()?.parse()?);
            }
            Short('h') | Long("help") => {
                args.help = true;
            }
            Short('V') | Long("version") => {
                args.version = true;
            }
            Long("inefficient") => {
                args.inefficient = true;
            }
            _ => return Err(arg.unexpected()),
        }
    }
    Ok(args)
}

fn print_help() {
    println!("hwdevices {}", env!("CARGO_PKG_VERSION"));
    println!("Network, disk, GPU and RAPL device monitor for Windows\n");
    println!("USAGE: hwdevices [OPTIONS]\n");
    println!("OPTIONS:");
    println!("  -d, --delay <MS>             Refresh rate in milliseconds (default: 1000)");
    println!("  -n, --max-iterations <N>     Exit after N updates");
    println!("  -l, --list                   List available devices and exit");
    println!("      --hidden                 Include hidden network adapters in --list");
    println!("      --add <KIND:ID>          Select a device (kind: network, disk, gpu, rapl)");
    println!("      --remove <KIND:ID>       Deselect a device");
    println!("      --inefficient            Disable Efficiency Mode (run at normal priority)");
    println!("  -h, --help                   Print help");
    println!("  -V, --version                Print version");
    println!();
    println!("Network IDs take the form ifIndex,luid,{{GUID}} as shown by --list;");
    println!("other kinds use the device interface path.");
}

/// Enable Windows Efficiency Mode (EcoQoS) for the current process
#[cfg(windows)]
fn enable_efficiency_mode() {
    use windows::Win32::System::Threading::{
        GetCurrentProcess, IDLE_PRIORITY_CLASS, PROCESS_POWER_THROTTLING_EXECUTION_SPEED,
        PROCESS_POWER_THROTTLING_IGNORE_TIMER_RESOLUTION, PROCESS_POWER_THROTTLING_STATE,
        ProcessPowerThrottling, SetPriorityClass, SetProcessInformation,
    };

    unsafe {
        let handle = GetCurrentProcess();

        // Set to idle priority class (lowest scheduling priority)
        let _ = SetPriorityClass(handle, IDLE_PRIORITY_CLASS);

        let mut throttle_state = PROCESS_POWER_THROTTLING_STATE {
            Version: 1, // PROCESS_POWER_THROTTLING_CURRENT_VERSION
            ControlMask: PROCESS_POWER_THROTTLING_EXECUTION_SPEED
                | PROCESS_POWER_THROTTLING_IGNORE_TIMER_RESOLUTION,
            StateMask: PROCESS_POWER_THROTTLING_EXECUTION_SPEED
                | PROCESS_POWER_THROTTLING_IGNORE_TIMER_RESOLUTION,
        };

        let _ = SetProcessInformation(
            handle,
            ProcessPowerThrottling,
            &mut throttle_state as *mut _ as *mut _,
            std::mem::size_of::<PROCESS_POWER_THROTTLING_STATE>() as u32,
        );
    }
}

#[cfg(not(windows))]
fn enable_efficiency_mode() {
    // No-op on non-Windows platforms
}

/// Parse a single identity in settings-list form
fn parse_id<I: DeviceId>(text: &str, setting: &'static str) -> Result<I, String> {
    let mut parsed = I::parse_setting_list(text, setting);
    if let Some(err) = parsed.errors.pop() {
        return Err(err.to_string());
    }
    match parsed.ids.len() {
        1 => Ok(parsed.ids.remove(0)),
        0 => Err(format!("empty device id {:?}", text)),
        n => Err(format!("expected one device id, got {}", n)),
    }
}

fn change_selection<K: DeviceKind>(
    registry: &DeviceRegistry<K>,
    id: &str,
    select: bool,
) -> Result<(), String> {
    let id: K::Id = parse_id(id, K::SETTING)?;
    if select {
        registry.select(id.clone());
        println!("Selected {} {}", K::NAME, id);
    } else if registry.deselect(&id) {
        println!("Deselected {} {}", K::NAME, id);
    } else {
        println!("{} {} was not selected", K::NAME, id);
    }
    Ok(())
}

fn apply_selection(ctx: &PluginContext, target: &str, select: bool) -> Result<(), String> {
    let Some((kind, id)) = target.split_once(':') else {
        return Err(format!("expected KIND:ID, got {:?}", target));
    };
    match kind {
        "network" | "net" => change_selection(ctx.network(), id, select),
        "disk" => change_selection(ctx.disks(), id, select),
        "gpu" => change_selection(ctx.gpus(), id, select),
        "rapl" | "power" => change_selection(ctx.rapl(), id, select),
        other => Err(format!("unknown device kind {:?}", other)),
    }
}

fn setting_form<I: DeviceId>(id: &I) -> String {
    let mut out = String::new();
    id.write_setting(&mut out);
    out.pop();
    out
}

fn list_kind<K: DeviceKind>(registry: &DeviceRegistry<K>, candidates: &[DeviceCandidate<K::Id>]) {
    println!("{}:", K::NAME);
    if candidates.is_empty() {
        println!("  (none found)");
    }
    for candidate in candidates {
        let selected = registry
            .find(&candidate.id)
            .is_some_and(|e| e.is_user_selected());
        println!(
            "  [{}] {}{}  {}",
            if selected { "x" } else { " " },
            candidate.description.as_deref().unwrap_or("Unknown device"),
            if candidate.present { "" } else { " (disconnected)" },
            setting_form(&candidate.id)
        );
    }
}

/// Fill entry names from enumeration; kinds whose queries report no name rely on this
fn resolve_names<K: DeviceKind>(registry: &DeviceRegistry<K>, candidates: &[DeviceCandidate<K::Id>]) {
    for candidate in candidates {
        if let (Some(entry), Some(description)) = (registry.find(&candidate.id), &candidate.description) {
            entry.set_name_if_empty(description.clone());
        }
    }
}

/// `-d` applies to this run only and is never persisted
fn refresh_interval(delay: Option<u64>, settings: &Settings) -> Duration {
    match delay {
        Some(ms) => Duration::from_millis(ms.max(1)),
        None => settings.refresh_interval(),
    }
}

fn print_report(ctx: &PluginContext, interval_ms: u64) {
    ctx.gpus().for_each(|entry| {
        let present = entry.is_present();
        entry.with_samples(|s| {
            println!(
                "GPU     {:<32} {:>6.1}%  ded {}/{}  shr {}{}",
                entry.display_name(),
                s.utilization * 100.0,
                format_bytes(s.dedicated_usage),
                format_bytes(s.dedicated_limit),
                format_bytes(s.shared_usage),
                if present { "" } else { "  (absent)" }
            );
        });
    });

    ctx.disks().for_each(|entry| {
        let present = entry.is_present();
        entry.with_samples(|s| {
            println!(
                "Disk    {:<32} R {:>10}  W {:>10}  active {:>5.1}%  resp {:.2} ms{}",
                entry.display_name(),
                format_rate(s.read_rate(), interval_ms),
                format_rate(s.write_rate(), interval_ms),
                s.active_time,
                s.response_time_ms(),
                if present { "" } else { "  (absent)" }
            );
        });
    });

    let interval = Duration::from_millis(interval_ms);
    ctx.network().for_each(|entry| {
        let present = entry.is_present();
        entry.with_samples(|s| {
            println!(
                "Net     {:<32} RX {:>10}  TX {:>10}  {} {:>5.1}%{}",
                entry.display_name(),
                format_rate(s.receive_rate(), interval_ms),
                format_rate(s.send_rate(), interval_ms),
                format_link_speed(s.link_speed),
                s.utilization(interval) * 100.0,
                if present { "" } else { "  (absent)" }
            );
        });
    });

    ctx.rapl().for_each(|entry| {
        let present = entry.is_present();
        entry.with_samples(|s| {
            println!(
                "Power   {:<32} pkg {:>6.2} W  core {:>6.2} W  dram {:>6.2} W  total {:>6.2} W{}",
                entry.display_name(),
                s.power(RaplChannel::Package),
                s.power(RaplChannel::Core),
                s.power(RaplChannel::Dram),
                s.total_power,
                if present { "" } else { "  (absent)" }
            );
        });
    });
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    if args.help {
        print_help();
        return Ok(());
    }

    if args.version {
        println!("hwdevices {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    // Enable Efficiency Mode by default (sampling is not latency sensitive)
    if !args.inefficient {
        enable_efficiency_mode();
    }

    // Load settings from file (or use defaults)
    let mut settings = Settings::load();

    let mut ctx = PluginContext::new(settings.clone(), system::platform_sources());
    ctx.load();

    if !args.add.is_empty() || !args.remove.is_empty() {
        for target in &args.add {
            if let Err(e) = apply_selection(&ctx, target, true) {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
        for target in &args.remove {
            if let Err(e) = apply_selection(&ctx, target, false) {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
        ctx.save(&mut settings);
        settings.save()?;
        return Ok(());
    }

    let hidden = args.hidden || settings.enable_hidden_adapters;
    let network = system::enumerate_network_adapters(hidden);
    let disks = system::enumerate_disks();
    let gpus = system::enumerate_gpus();
    let rapl = system::enumerate_rapl();

    if args.list {
        list_kind::<Network>(ctx.network(), &network);
        list_kind::<Disk>(ctx.disks(), &disks);
        list_kind::<Gpu>(ctx.gpus(), &gpus);
        list_kind::<Rapl>(ctx.rapl(), &rapl);
        return Ok(());
    }

    resolve_names::<Network>(ctx.network(), &network);
    resolve_names::<Disk>(ctx.disks(), &disks);
    resolve_names::<Gpu>(ctx.gpus(), &gpus);
    resolve_names::<Rapl>(ctx.rapl(), &rapl);
    let present_disks: Vec<DevicePath> = disks.into_iter().map(|c| c.id).collect();
    ctx.prune_disks(&present_disks);

    if ctx.network().is_empty()
        && ctx.disks().is_empty()
        && ctx.gpus().is_empty()
        && ctx.rapl().is_empty()
    {
        println!("No devices selected. Use --list to see devices and --add KIND:ID to select one.");
        return Ok(());
    }

    let interval = refresh_interval(args.delay, &settings);
    let interval_ms = interval.as_millis() as u64;
    let mut iteration: u64 = 0;

    loop {
        let started = Instant::now();
        let summary = ctx.tick();
        log::debug!("Tick {}: {:?}", ctx.tick_count(), summary);

        // The first tick only establishes baselines
        if iteration > 0 {
            println!("--- {} ---", ctx.tick_count());
            print_report(&ctx, interval_ms);
        }

        iteration += 1;
        if args.max_iterations.is_some_and(|max| iteration > max) {
            break;
        }

        thread::sleep(interval.saturating_sub(started.elapsed()));
    }

    ctx.unload();
    Ok(())
}
