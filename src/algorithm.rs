pub mod laser_odom;
