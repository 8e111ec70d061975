use std::{
    any::Any,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
    time::Duration,
};

use parking_lot::Mutex;

use crate::{
    component::{Component, ValidatedConfig},
    error::{ComponentError, ProcessError},
};

/// 引擎与具体组件之间的统一处理边界。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 引擎只依赖 `process(bytes) -> optional bytes`，不关心组件的具体形态；
/// - 组件的错误与 panic 都在这里收敛为 [`ProcessError`]，不会冲垮工作循环。
///
/// ## 逻辑 (How)
/// - 组件装在 `Arc<Mutex<Box<dyn Component>>>` 中：工作循环处理消息、管理面重载配置都需先持锁，
///   因此两者天然串行，组件自身无需线程安全；
/// - `catch_unwind` 捕获组件 panic；`parking_lot::Mutex` 不会因 panic 中毒，后续消息照常处理。
///
/// ## 契约 (What)
/// - 不改写负载内容；`Ok(None)` 原样传递给引擎表示过滤；
/// - `reload` 返回 `Err` 时组件应保持旧配置。
///
/// ## 风险提示 (Trade-offs)
/// - 重载需要等待当前消息处理完毕，但至多等待调用方给出的 `wait`；
///   超时即以“组件忙”拒绝，避免管理命令被卡死在长耗时消息上。
#[derive(Clone)]
pub struct Processor {
    component: Arc<Mutex<Box<dyn Component>>>,
    path: Arc<str>,
}

impl Processor {
    pub fn new(path: &str, component: Box<dyn Component>) -> Self {
        Self {
            component: Arc::new(Mutex::new(component)),
            path: Arc::from(path),
        }
    }

    /// 组件路径，用于日志字段。
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn process(&self, payload: &[u8]) -> Result<Option<Vec<u8>>, ProcessError> {
        let mut component = self.component.lock();
        match catch_unwind(AssertUnwindSafe(|| component.process(payload))) {
            Ok(result) => result.map_err(ProcessError::from),
            Err(panic) => Err(ProcessError::Panicked {
                message: panic_message(panic.as_ref()),
            }),
        }
    }

    /// 在组件锁内调用 `Component::reconfigure`；`wait` 内拿不到锁则返回错误，组件保持旧配置。
    pub fn reload(&self, config: &ValidatedConfig, wait: Duration) -> Result<(), ComponentError> {
        let Some(mut component) = self.component.try_lock_for(wait) else {
            return Err(ComponentError::new(format!(
                "component busy: still processing a message after {} ms",
                wait.as_millis()
            )));
        };
        match catch_unwind(AssertUnwindSafe(|| component.reconfigure(config))) {
            Ok(result) => result,
            Err(panic) => Err(ComponentError::new(format!(
                "panicked during reconfigure: {}",
                panic_message(panic.as_ref())
            ))),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
