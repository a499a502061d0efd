use rquickjs::{Ctx, Function, Persistent};

/// A script callable kept alive outside the engine's stack-rooted lifetime.
///
/// Not `Clone`: a closure has exactly one owner at a time, either the handle that holds it
/// while armed or the invocation frame while it runs. Dropping it releases the engine
/// reference, so it must be dropped before the engine runtime is destroyed.
pub struct ScriptClosure {
    func: Persistent<Function<'static>>,
}

impl ScriptClosure {
    /// Take an owning reference to `func`; the script keeps its own binding untouched
    pub fn new<'js>(ctx: &Ctx<'js>, func: Function<'js>) -> Self {
        Self {
            func: Persistent::save(ctx, func),
        }
    }

    /// Call the closure with no arguments and an undefined receiver
    pub fn invoke<'js>(&self, ctx: &Ctx<'js>) -> rquickjs::Result<()> {
        let func = self.func.clone().restore(ctx)?;
        func.call::<_, ()>(())
    }
}

impl std::fmt::Debug for ScriptClosure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ScriptClosure")
    }
}
