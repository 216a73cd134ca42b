// [[file:../../intranode.note::0f3d6a29][0f3d6a29]]
use gosh_core::gut::prelude::*;

fn main() -> Result<()> {
    gosh_intranode::cli::enter_main()?;

    Ok(())
}
// 0f3d6a29 ends here
