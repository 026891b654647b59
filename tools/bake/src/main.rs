//! 批量实例烘焙.
//!
//! 从 `$SKEL_SAMPLES_DIR` (或 `$HOME/dataset/skel/samples`) 下的每个样本目录读取
//! 已拼接的网络输出, 重建实例标签并写回 `instances.npy`.

mod profile;
mod result;
mod runner;

fn main() {
    simple_logger::init_with_level(log::Level::Info).unwrap();

    match runner::run() {
        Ok(result) => {
            if let Err(e) = result.analyze() {
                log::error!("cannot print result: {e}");
            }
        }
        Err(e) => {
            log::error!("{e}");
            std::process::exit(1);
        }
    }
}
