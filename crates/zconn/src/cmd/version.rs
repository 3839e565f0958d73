use zconn_frame::{DEFAULT_ESCAPE, DEFAULT_MAX_FRAME};

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("zconn {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: zconn");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "target: {}",
        option_env!("ZCONN_BUILD_TARGET").unwrap_or("unknown")
    );
    println!(
        "profile: {}",
        option_env!("ZCONN_BUILD_PROFILE").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!("escape: {}", String::from_utf8_lossy(&DEFAULT_ESCAPE));
    println!("max_frame: {DEFAULT_MAX_FRAME}");
    println!("unix_sockets: {}", cfg!(unix));

    Ok(SUCCESS)
}
