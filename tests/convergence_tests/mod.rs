mod diffusion_2d_mms;
