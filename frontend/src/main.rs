use clap::Parser;
use nds_core::core::machine::Machine;
use nds_machines::NdsSystem;

mod audio;
mod emulator;
mod input;
mod overlay;
mod rom_path;
mod video;

/// Boot a handheld console cartridge image.
#[derive(Parser, Debug)]
#[command(name = "nds-emu")]
struct Cli {
    /// Cartridge ROM image
    rom: std::path::PathBuf,

    /// ARM9 BIOS image
    #[arg(long)]
    bios_a: Option<std::path::PathBuf>,

    /// ARM7 BIOS image
    #[arg(long)]
    bios_c: Option<std::path::PathBuf>,

    /// Firmware image
    #[arg(long)]
    firmware: Option<std::path::PathBuf>,

    /// Optional TOML config file providing defaults for the flags above
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    /// Window scale factor
    #[arg(long)]
    scale: Option<u32>,
}

fn main() {
    let cli = Cli::parse();

    let file_config = cli
        .config
        .as_deref()
        .and_then(|path| rom_path::load_config(path).ok())
        .unwrap_or_default();

    let bios_a_path = cli.bios_a.or(file_config.bios_a);
    let bios_c_path = cli.bios_c.or(file_config.bios_c);
    let firmware_path = cli.firmware.or(file_config.firmware);
    let scale = cli.scale.or(file_config.scale).unwrap_or(2);

    let rom_data = rom_path::read_image(&cli.rom).expect("Failed to read ROM image");

    let mut system = NdsSystem::new();
    system.load_rom(rom_data);

    if let Some(path) = &bios_a_path {
        let data = rom_path::read_image(path).expect("Failed to read ARM9 BIOS image");
        system.load_bios_a(&data);
    }
    if let Some(path) = &bios_c_path {
        let data = rom_path::read_image(path).expect("Failed to read ARM7 BIOS image");
        system.load_bios_c(&data);
    }
    if let Some(path) = &firmware_path {
        let data = rom_path::read_image(path).expect("Failed to read firmware image");
        system.load_firmware(&data);
    }

    let nvram_path = cli.rom.with_extension("sav");
    if let Ok(data) = std::fs::read(&nvram_path) {
        system.load_nvram(&data);
    }

    let key_map = input::default_key_map(system.input_map());
    system.reset();

    let mut machine: Box<dyn Machine> = Box::new(system);
    emulator::run(machine.as_mut(), &key_map, scale);

    if let Some(data) = machine.save_nvram()
        && let Err(e) = std::fs::write(&nvram_path, data)
    {
        eprintln!("Warning: failed to save battery save: {e}");
    }
}
