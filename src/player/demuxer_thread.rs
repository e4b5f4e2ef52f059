use crate::player::demuxer::{Demuxer, ReadOutcome};
use crate::player::log_ctx;
use crate::player::worker::Status;
use log::{debug, error, info, warn};
use std::thread;
use std::time::Duration;

const QUEUE_FULL_SLEEP: Duration = Duration::from_millis(20);
const ERROR_SLEEP: Duration = Duration::from_millis(10);

/// 解封装读取循环（在 Demuxer 的工作线程中运行）
///
/// 关键点：
/// - 队列满时进入 QueueFull 并停止读取（背压）；外部音频/数据流直接停下并标记需要重同步
/// - 读取与入队在同一次格式锁内完成，seek 只能插在两个包之间
/// - 被强制中断的读取不算错误，连续真实错误超过上限视为结束
pub(crate) fn run(demuxer: &Demuxer) -> Status {
    info!("{} 🎬 解封装线程启动: {}", log_ctx(), demuxer.description());

    let max_errors = demuxer_max_errors(demuxer);
    let mut read_errors: u32 = 0;
    let mut packet_count: usize = 0;

    let exit = loop {
        if !demuxer.worker.is_active() {
            break Status::Paused;
        }

        if demuxer.is_queue_full() {
            if demuxer.pause_on_queue_full() {
                demuxer.set_resync_pending(true);
                info!("{} ⏸ [{}] 队列已满，暂停读取并等待重同步", log_ctx(), demuxer.kind());
                break Status::Paused;
            }
            demuxer.worker.update_active(Status::QueueFull);
            thread::sleep(QUEUE_FULL_SLEEP);
            continue;
        }
        demuxer.worker.update_active(Status::Running);

        let mut slot = demuxer.lock_format();
        match demuxer.read_locked(&mut slot) {
            ReadOutcome::Packet(packet) => {
                read_errors = 0;
                packet_count += 1;
                if packet_count <= 5 || packet_count % 500 == 0 {
                    debug!("{} 📦 [{}] 读取包 #{} (stream {}, ts {:?})", log_ctx(), demuxer.kind(), packet_count, packet.stream_index, packet.timestamp());
                }
                // 入队必须仍在格式锁内：seek 清空队列后不能再混入旧位置的包
                demuxer.enqueue(packet);
            }
            ReadOutcome::Eof => {
                info!("{} 📄 [{}] 到达文件末尾", log_ctx(), demuxer.kind());
                break Status::Ended;
            }
            ReadOutcome::Interrupted => {
                // seek/暂停正在进行，等待其完成
                drop(slot);
                thread::sleep(Duration::from_millis(1));
            }
            ReadOutcome::Failed(e) => {
                read_errors += 1;
                warn!("{} ⚠ [{}] 读取失败 ({}/{}): {}", log_ctx(), demuxer.kind(), read_errors, max_errors, e);
                if read_errors >= max_errors {
                    error!("{} ❌ [{}] 连续读取失败过多，停止读取", log_ctx(), demuxer.kind());
                    break Status::Ended;
                }
                drop(slot);
                thread::sleep(ERROR_SLEEP);
            }
            ReadOutcome::Closed => break Status::Stopped,
        }
    };

    info!("{} 🛑 [{}] 解封装线程退出: {:?}（共读取 {} 个包）", log_ctx(), demuxer.kind(), exit, packet_count);
    exit
}

fn demuxer_max_errors(demuxer: &Demuxer) -> u32 {
    demuxer.config().demuxer.max_read_errors.max(1)
}
