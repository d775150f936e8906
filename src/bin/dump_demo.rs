//! Builds `int f(int a, int b) { return a + b * 2; }` and prints its
//! textual IR, exercising the builder and the textual backend end to end
//! without a real front end.

use anyhow::Result;
use ssa_ir::{Linkage, Module, Ty};

fn main() -> Result<()> {
    env_logger::init();

    let mut module = Module::new("demo");
    let fn_ty = Ty::function(vec![Ty::i32(true), Ty::i32(true)], Ty::i32(true), false);
    let f = module.create_function(Linkage::External, "f", fn_ty);
    let entry = module.create_block(f, None);
    module.set_insert_point(entry);

    let a = module.create_arg_ref(f, 0);
    let b = module.create_arg_ref(f, 1);
    let two = module.get_int32(2);
    let product = module.create_mul(b, two);
    let sum = module.create_add(a, product);
    module.create_return(Some(sum));

    print!("{}", module.dump());
    Ok(())
}
