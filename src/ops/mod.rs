pub mod canvas_ops;
pub mod layer_ops;
pub mod mask_ops;
